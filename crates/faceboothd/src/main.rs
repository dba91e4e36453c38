use anyhow::Result;
use facebooth_core::SwapPipeline;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod routes;
mod templates;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("faceboothd starting");

    let config = config::Config::load()?;
    tracing::info!(
        model_dir = %config.model_dir.display(),
        template_dir = %config.template_dir.display(),
        det_size = config.det_size,
        restoration_enabled = config.restoration_enabled,
        "configuration loaded"
    );

    let model_paths = config.model_paths();
    let pipeline = tokio::task::spawn_blocking(move || SwapPipeline::load(&model_paths)).await?;
    let engine = engine::spawn_engine(pipeline)?;

    let state = routes::AppState {
        engine,
        templates: templates::TemplateStore::new(&config.template_dir),
    };
    let app = routes::router(state, config.body_limit_bytes);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "faceboothd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("faceboothd shutting down");
    Ok(())
}
