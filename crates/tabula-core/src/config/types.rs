//! Configuration types for the sandbox engine

use crate::errors::SandboxError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Sandbox engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Base image every sandbox instance is launched from
    #[serde(default = "default_image")]
    pub image: String,
    /// Fixed workspace path inside the instance
    #[serde(default = "default_workspace")]
    pub workspace: String,
    /// Shared host directory input files are resolved against
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    /// Host directory holding one subdirectory per request
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Prefix of container names and output subdirectories
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// Wall-clock bound on the executed code
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Grace period given to the instance when stopping it
    #[serde(default = "default_stop_grace_seconds")]
    pub stop_grace_seconds: u64,
    /// Maximum characters of stdout/stderr returned to the caller
    #[serde(default = "default_max_log_length")]
    pub max_log_length: usize,
    /// Maximum raw bytes buffered per stream while the code runs
    #[serde(default = "default_capture_limit_bytes")]
    pub capture_limit_bytes: usize,
    /// Principal the code is executed as
    #[serde(default = "default_user")]
    pub user: String,
    /// Interpreter command the script is passed to
    #[serde(default = "default_interpreter")]
    pub interpreter: Vec<String>,
    /// File name of the wrapped script inside the workspace
    #[serde(default = "default_script_name")]
    pub script_name: String,
    /// Environment variables for the executed process
    #[serde(default = "default_environment")]
    pub environment: HashMap<String, String>,
    /// Replaces the built-in preamble when set
    #[serde(default)]
    pub preamble: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            workspace: default_workspace(),
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            name_prefix: default_name_prefix(),
            timeout_seconds: default_timeout_seconds(),
            stop_grace_seconds: default_stop_grace_seconds(),
            max_log_length: default_max_log_length(),
            capture_limit_bytes: default_capture_limit_bytes(),
            user: default_user(),
            interpreter: default_interpreter(),
            script_name: default_script_name(),
            environment: default_environment(),
            preamble: None,
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }

    /// Create the input and output roots if they do not exist yet
    pub fn ensure_directories(&self) -> Result<(), SandboxError> {
        for dir in [&self.input_dir, &self.output_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                SandboxError::Config(format!(
                    "Failed to create directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.image.trim().is_empty() {
            return Err(SandboxError::Config("Sandbox image cannot be empty".to_string()));
        }

        if !self.workspace.starts_with('/') {
            return Err(SandboxError::Config(format!(
                "Sandbox workspace must be an absolute container path, got '{}'",
                self.workspace
            )));
        }

        if self.name_prefix.trim().is_empty() {
            return Err(SandboxError::Config("Sandbox name_prefix cannot be empty".to_string()));
        }

        if self.timeout_seconds == 0 {
            return Err(SandboxError::Config(
                "Sandbox timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.max_log_length == 0 {
            return Err(SandboxError::Config(
                "Sandbox max_log_length must be greater than 0".to_string(),
            ));
        }

        if self.capture_limit_bytes < self.max_log_length {
            return Err(SandboxError::Config(format!(
                "Sandbox capture_limit_bytes ({}) must be at least max_log_length ({})",
                self.capture_limit_bytes, self.max_log_length
            )));
        }

        if self.interpreter.is_empty() || self.interpreter[0].trim().is_empty() {
            return Err(SandboxError::Config("Sandbox interpreter cannot be empty".to_string()));
        }

        if self.user.trim().is_empty() {
            return Err(SandboxError::Config("Sandbox user cannot be empty".to_string()));
        }

        let mut components = Path::new(&self.script_name).components();
        let is_plain_name = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !is_plain_name {
            return Err(SandboxError::Config(format!(
                "Sandbox script_name must be a plain file name, got '{}'",
                self.script_name
            )));
        }

        Ok(())
    }
}

fn default_image() -> String {
    "data-analyzer-sandbox:latest".to_string()
}

fn default_workspace() -> String {
    "/workspace".to_string()
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

fn default_name_prefix() -> String {
    "tabula-sandbox".to_string()
}

fn default_user() -> String {
    "root".to_string()
}

fn default_interpreter() -> Vec<String> {
    vec!["python".to_string()]
}

fn default_script_name() -> String {
    "script.py".to_string()
}

fn default_environment() -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
    env
}

fn default_timeout_seconds() -> u64 { 60 }
fn default_stop_grace_seconds() -> u64 { 2 }
fn default_max_log_length() -> usize { 4000 }
fn default_capture_limit_bytes() -> usize { 1024 * 1024 }
