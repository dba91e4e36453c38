use facebooth_core::ModelPaths;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Daemon configuration.
///
/// Built-in defaults, then the TOML file named by `FACEBOOTH_CONFIG` (if
/// any), then `FACEBOOTH_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address (default: 0.0.0.0).
    pub host: String,
    /// Listen port (default: 5000).
    pub port: u16,
    /// Directory holding the template photos.
    pub template_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Square SCRFD input size.
    pub det_size: usize,
    /// Whether to try loading the GFPGAN restorer at startup.
    pub restoration_enabled: bool,
    /// Maximum accepted request body.
    pub body_limit_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            template_dir: PathBuf::from("template"),
            model_dir: PathBuf::from("models"),
            det_size: facebooth_core::detector::SCRFD_DEFAULT_INPUT_SIZE,
            restoration_enabled: true,
            body_limit_bytes: 32 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load configuration from the optional file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("FACEBOOTH_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML file; keys it leaves out keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `FACEBOOTH_*` overrides. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACEBOOTH_HOST") {
            self.host = v;
        }
        if let Some(v) = lookup("FACEBOOTH_TEMPLATE_DIR") {
            self.template_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEBOOTH_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        self.port = parsed(&lookup, "FACEBOOTH_PORT", self.port);
        self.det_size = parsed(&lookup, "FACEBOOTH_DET_SIZE", self.det_size);
        self.body_limit_bytes = parsed(&lookup, "FACEBOOTH_BODY_LIMIT_BYTES", self.body_limit_bytes);
        if let Some(v) = lookup("FACEBOOTH_RESTORATION_ENABLED") {
            self.restoration_enabled = v != "0" && !v.eq_ignore_ascii_case("false");
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            model_dir: self.model_dir.clone(),
            det_size: self.det_size,
            restoration_enabled: self.restoration_enabled,
        }
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    match lookup(key) {
        Some(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparseable config override");
            current
        }),
        None => current,
    }
}
