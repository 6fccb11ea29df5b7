//! Error types for the sandbox execution engine
//!
//! Errors are grouped by the stage of a request that produced them. Only
//! configuration, runtime reachability, packaging and genuine internal faults
//! are returned as `Err` to callers. A non-zero exit from the executed code and
//! a timeout are part of the normal `ExecutionResult`, and retrieval misses are
//! simply absent from the generated list.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),
    #[error("Failed to start sandbox instance: {0}")]
    InstanceStart(String),
    #[error("Failed to package code and inputs: {0}")]
    Packaging(String),
    #[error("Failed to inject files into sandbox instance: {0}")]
    Injection(String),
    #[error("Failed to run code in sandbox instance: {0}")]
    Exec(String),
    #[error("Failed to retrieve artifact: {0}")]
    Retrieval(String),
    #[error("Failed to tear down sandbox instance: {0}")]
    Teardown(String),
    #[error("Execution was cancelled")]
    Cancelled,
    #[error("Invalid execution request: {0}")]
    InvalidRequest(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SandboxError {
    /// Whether this error ends the request before any code ran.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            SandboxError::Config(_)
                | SandboxError::RuntimeUnavailable(_)
                | SandboxError::InstanceStart(_)
                | SandboxError::Packaging(_)
                | SandboxError::Injection(_)
        )
    }
}

impl From<serde_json::Error> for SandboxError {
    fn from(err: serde_json::Error) -> Self {
        SandboxError::InvalidRequest(err.to_string())
    }
}

impl From<serde_yaml::Error> for SandboxError {
    fn from(err: serde_yaml::Error) -> Self {
        SandboxError::Config(err.to_string())
    }
}
