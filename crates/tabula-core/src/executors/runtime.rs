//! The container runtime seam.
//!
//! The engine only needs a handful of calls from the isolation runtime.
//! Keeping them behind a trait lets the Docker client be swapped for an
//! in-memory runtime in tests.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::time::Duration;

use crate::errors::SandboxError;

/// Parameters for creating a sandbox instance
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub name: String,
    pub image: String,
    pub working_dir: String,
    /// Keeps the instance alive and idle until it is stopped
    pub command: Vec<String>,
}

/// Parameters for running a command inside a started instance
#[derive(Debug, Clone)]
pub struct ExecSpec {
    pub command: Vec<String>,
    pub user: String,
    /// `KEY=value` pairs
    pub env: Vec<String>,
    pub working_dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

pub type OutputStream = BoxStream<'static, Result<OutputChunk, SandboxError>>;

/// A running exec: its id and its demultiplexed output
pub struct ExecSession {
    pub exec_id: String,
    pub output: OutputStream,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Checks that the runtime is reachable
    async fn ping(&self) -> Result<(), SandboxError>;

    /// Creates an instance and returns its runtime id
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<String, SandboxError>;

    async fn start_instance(&self, id: &str) -> Result<(), SandboxError>;

    /// Extracts a tar archive into `destination` inside the instance
    async fn upload_archive(
        &self,
        id: &str,
        destination: &str,
        archive: Vec<u8>,
    ) -> Result<(), SandboxError>;

    async fn start_exec(&self, id: &str, spec: &ExecSpec) -> Result<ExecSession, SandboxError>;

    /// Exit code of a finished exec, `None` while it is still running.
    /// A finished exec that reports no code counts as failed.
    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, SandboxError>;

    /// Returns `path` inside the instance packed as a tar archive
    async fn download_archive(&self, id: &str, path: &str) -> Result<Vec<u8>, SandboxError>;

    async fn stop_instance(&self, id: &str, grace: Duration) -> Result<(), SandboxError>;

    async fn kill_instance(&self, id: &str) -> Result<(), SandboxError>;

    async fn remove_instance(&self, id: &str, force: bool) -> Result<(), SandboxError>;
}
