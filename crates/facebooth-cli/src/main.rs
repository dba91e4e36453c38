use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facebooth_core::{ModelPaths, ResultEncoder, SwapPipeline};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "facebooth", about = "facebooth face swap CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Swap the faces of a captured photo onto a template and write a JPEG
    Swap {
        /// Photo whose faces are transplanted
        #[arg(long)]
        captured: PathBuf,
        /// Photo that receives the faces
        #[arg(long)]
        template: PathBuf,
        /// Output JPEG path
        #[arg(short, long)]
        output: PathBuf,
        /// Skip quality enhancement
        #[arg(long)]
        no_enhance: bool,
        /// Directory containing ONNX model files
        #[arg(long, default_value = "models")]
        model_dir: PathBuf,
    },
    /// Load all models and report which capabilities are available
    Probe {
        /// Directory containing ONNX model files
        #[arg(long, default_value = "models")]
        model_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Swap {
            captured,
            template,
            output,
            no_enhance,
            model_dir,
        } => {
            let captured_bytes = std::fs::read(&captured)
                .with_context(|| format!("reading {}", captured.display()))?;
            let template_bytes = std::fs::read(&template)
                .with_context(|| format!("reading {}", template.display()))?;

            let mut pipeline = SwapPipeline::load(&ModelPaths::new(model_dir));
            let result = pipeline.run(&captured_bytes, &template_bytes, !no_enhance)?;
            let jpeg = ResultEncoder::default().encode_jpeg(&result.image)?;
            std::fs::write(&output, jpeg).with_context(|| format!("writing {}", output.display()))?;

            println!(
                "Swapped {} face(s){} -> {}",
                result.faces_swapped,
                if result.enhanced { ", enhanced" } else { "" },
                output.display()
            );
        }
        Commands::Probe { model_dir } => {
            let pipeline = SwapPipeline::load(&ModelPaths::new(&model_dir));
            let report = serde_json::json!({
                "model_dir": model_dir.display().to_string(),
                "capabilities": pipeline.capabilities(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
