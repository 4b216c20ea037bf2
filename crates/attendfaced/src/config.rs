use attendface_core::PipelineOptions;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid bind address {0:?}")]
    Bind(String),
}

/// Daemon configuration: defaults, then an optional TOML file named by
/// `ATTENDFACE_CONFIG`, then `ATTENDFACE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address for the JSON API (default: 0.0.0.0:5000).
    pub bind: String,
    /// Root of the per-class gallery directories.
    pub dataset_dir: PathBuf,
    /// Directory holding one attendance CSV per class.
    pub attendance_dir: PathBuf,
    /// SeetaFace frontal cascade model file.
    pub model_path: PathBuf,
    /// Equalize the probe before detection, as enrollment does.
    pub equalize_probe: bool,
    /// Neighbors consulted per identification vote.
    pub neighbors: usize,
    /// Largest accepted request body, in MiB.
    pub max_body_mb: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            dataset_dir: PathBuf::from("./face_dataset"),
            attendance_dir: PathBuf::from("./attendance_data"),
            model_path: PathBuf::from("./models/seeta_fd_frontal_v1.0.bin"),
            equalize_probe: true,
            neighbors: attendface_core::knn::DEFAULT_NEIGHBORS,
            max_body_mb: 32,
        }
    }
}

impl Config {
    /// Load configuration from the optional config file and the process
    /// environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("ATTENDFACE_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.bind_addr()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `ATTENDFACE_*` variables resolved by `lookup`.
    /// Unparseable numeric values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ATTENDFACE_BIND") {
            self.bind = v;
        }
        if let Some(v) = lookup("ATTENDFACE_DATASET_DIR") {
            self.dataset_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ATTENDFACE_ATTENDANCE_DIR") {
            self.attendance_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ATTENDFACE_MODEL_PATH") {
            self.model_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ATTENDFACE_EQUALIZE_PROBE") {
            self.equalize_probe = v != "0";
        }
        self.neighbors = env_usize(&lookup, "ATTENDFACE_NEIGHBORS", self.neighbors);
        self.max_body_mb = env_usize(&lookup, "ATTENDFACE_MAX_BODY_MB", self.max_body_mb);
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|_| ConfigError::Bind(self.bind.clone()))
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            neighbors: self.neighbors,
            equalize_probe: self.equalize_probe,
        }
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_mb.saturating_mul(1024 * 1024)
    }
}

fn env_usize(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
