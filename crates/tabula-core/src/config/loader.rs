//! Configuration loader for YAML files and environment overrides
//!
//! Values are read from YAML first, then a small set of `TABULA_*`
//! environment variables override them, then the result is validated.

use crate::config::types::SandboxConfig;
use crate::errors::SandboxError;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const ENV_IMAGE: &str = "TABULA_IMAGE";
pub const ENV_INPUT_DIR: &str = "TABULA_INPUT_DIR";
pub const ENV_OUTPUT_DIR: &str = "TABULA_OUTPUT_DIR";
pub const ENV_TIMEOUT_SECONDS: &str = "TABULA_TIMEOUT_SECONDS";

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<SandboxConfig, SandboxError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).await.map_err(|e| {
            SandboxError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_str(content: &str) -> Result<SandboxConfig, SandboxError> {
        // An empty document means "all defaults"
        let mut config: SandboxConfig = if content.trim().is_empty() {
            SandboxConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| {
                SandboxError::Config(format!("Failed to parse YAML config: {}", e))
            })?
        };

        Self::resolve_environment(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    /// Defaults plus environment overrides, used when no file is given
    pub fn from_env() -> Result<SandboxConfig, SandboxError> {
        let mut config = SandboxConfig::default();
        Self::resolve_environment(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_environment(config: &mut SandboxConfig) -> Result<(), SandboxError> {
        if let Ok(image) = env::var(ENV_IMAGE) {
            log::debug!("Using sandbox image from {}: {}", ENV_IMAGE, image);
            config.image = image;
        }

        if let Ok(dir) = env::var(ENV_INPUT_DIR) {
            config.input_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = env::var(ENV_OUTPUT_DIR) {
            config.output_dir = PathBuf::from(dir);
        }

        if let Ok(raw) = env::var(ENV_TIMEOUT_SECONDS) {
            config.timeout_seconds = raw.trim().parse().map_err(|e| {
                SandboxError::Config(format!(
                    "Invalid {} value '{}': {}",
                    ENV_TIMEOUT_SECONDS, raw, e
                ))
            })?;
        }

        Ok(())
    }
}
