//! Configuration loading
//!
//! Reads a YAML document, decodes it into a [`Config`] and validates it. The
//! synchronous entry point is used at startup and for `--validate-config`;
//! reloads go through the [`ConfigSource`] trait so the collector does not
//! care where a fresh snapshot comes from.

use crate::config::Config;
use crate::error::{ExporterError, Result};
use crate::validation;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default config location when neither flag nor environment names one
pub const DEFAULT_CONFIG_PATH: &str = "configs/config.yaml";

/// Environment variable consulted for the config path
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

/// Anything that can produce a fresh, validated configuration snapshot
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Load and validate a new snapshot
    async fn load(&self) -> Result<Config>;

    /// Human readable origin, used in log lines
    fn describe(&self) -> String;
}

/// Configuration backed by a YAML file on disk
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn load(&self) -> Result<Config> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ExporterError::ConfigRead {
                path: self.path.clone(),
                source,
            })?;
        parse_config(&raw, &self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Read, parse and validate the configuration file at `path`
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    info!("Loading configuration from {}", path.display());

    let raw = std::fs::read_to_string(path).map_err(|source| ExporterError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&raw, path)
}

/// Parse and validate a YAML document; `origin` only feeds error messages
pub fn parse_config(raw: &str, origin: &Path) -> Result<Config> {
    let config: Config = serde_yaml::from_str(raw)
        .map_err(|e| ExporterError::config_parse(origin, e.to_string()))?;

    validation::validate(&config)?;

    debug!(
        "Configuration from {} is valid: {} metrics",
        origin.display(),
        config.metrics.len()
    );
    Ok(config)
}
