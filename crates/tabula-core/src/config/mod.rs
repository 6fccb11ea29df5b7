//! Configuration for the sandbox engine
//!
//! Supports YAML configuration files with per-field defaults and a few
//! environment overrides.

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;


use crate::errors::SandboxError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<SandboxConfig, SandboxError> {
    ConfigLoader::from_file(path).await
}
