//! Sandboxed code execution.
//!
//! A request travels through five stages, each in its own module: the
//! lifecycle manager acquires a fresh container, the inbound transport
//! injects the wrapped script and input files, the controller runs the
//! script under a wall-clock bound, the outbound transport pulls the expected
//! artifacts back to the host, and result assembly bounds the captured text.
//! `SandboxedCodeExecutor` wires the stages together and owns teardown.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::errors::SandboxError;

/// Code to run plus the files it reads and is expected to write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    #[serde(default)]
    pub input_files: Vec<String>,
    #[serde(default)]
    pub output_files_expected: Vec<String>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            input_files: Vec::new(),
            output_files_expected: Vec::new(),
        }
    }

    pub fn with_input_files<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_files = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_output_files<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_files_expected = names.into_iter().map(Into::into).collect();
        self
    }
}

/// Outcome of one request
///
/// `files_generated` and `host_file_paths` correspond by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status_code: i64,
    pub stdout: String,
    pub stderr: String,
    /// Wall-clock seconds spent running the code
    pub execution_time: f64,
    pub files_generated: Vec<String>,
    pub host_file_paths: Vec<PathBuf>,
    #[serde(default)]
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status_code == 0 && !self.timed_out
    }

    /// Failure-shaped result for a request that never got to run its code
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status_code: 1,
            stdout: String::new(),
            stderr: message.into(),
            execution_time: 0.0,
            files_generated: Vec::new(),
            host_file_paths: Vec::new(),
            timed_out: false,
        }
    }
}

#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, SandboxError> {
        self.execute_with_cancel(request, CancellationToken::new()).await
    }

    /// Like `execute`, but tears the instance down early once `cancel` fires
    async fn execute_with_cancel(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, SandboxError>;
}

/// Ensures paths for container operations use forward slashes.
pub fn normalize_container_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Joins a workspace-relative name onto the in-instance workspace path.
pub fn container_path(workspace: &str, name: &str) -> String {
    let workspace = normalize_container_path(workspace);
    let name = normalize_container_path(name);
    format!(
        "{}/{}",
        workspace.trim_end_matches('/'),
        name.trim_start_matches('/')
    )
}

/// Interprets a caller-supplied file name as a path relative to a root.
///
/// Returns `None` for empty names, absolute paths and anything containing
/// `..`, so a name can never resolve outside the root it is joined to.
pub(crate) fn relative_file_name(name: &str) -> Option<PathBuf> {
    let normalized = normalize_container_path(name);
    if normalized.is_empty() || normalized.starts_with('/') {
        return None;
    }

    let mut relative = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }

    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}

pub mod controller;
pub mod docker;
pub mod inbound;
pub mod lifecycle;
pub mod outbound;
pub mod result;
pub mod runtime;
pub mod sandboxed;


pub use docker::DockerRuntime;
pub use lifecycle::{InstanceLease, InstanceState, LifecycleManager, RequestId, TeardownReport};
pub use runtime::ContainerRuntime;
pub use sandboxed::SandboxedCodeExecutor;
