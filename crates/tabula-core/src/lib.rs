//! Sandboxed execution of generated analysis code.
//!
//! Each request runs in its own short-lived Docker container: the code is
//! wrapped with a fixed preamble, copied in together with the requested
//! input files, executed under a wall-clock bound, and the expected output
//! files are copied back to a per-request host directory. The container is
//! always torn down, whatever happened along the way.
//!
//! - **Configuration**: `SandboxConfig`, loaded from YAML with environment overrides
//! - **Execution engine**: `SandboxedCodeExecutor` behind the `CodeExecutor` trait
//! - **Container runtime**: `ContainerRuntime` seam with a bollard-backed `DockerRuntime`
//! - **Agent tool**: `ExecuteCodeTool` exposing the engine as a JSON tool

pub mod config;
pub mod errors;
pub mod executors;
pub mod tools;

pub use config::{ConfigLoader, SandboxConfig};
pub use errors::SandboxError;
pub use executors::{
    CodeExecutor, DockerRuntime, ExecutionRequest, ExecutionResult, SandboxedCodeExecutor,
};
pub use tools::{ExecuteCodeTool, Tool, ToolRegistry};

#[cfg(test)]
pub mod test_utils;
