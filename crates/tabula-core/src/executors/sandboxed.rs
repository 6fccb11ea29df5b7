//! Per-request orchestration of the sandbox pipeline.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::controller::ExecutionController;
use super::docker::DockerRuntime;
use super::inbound::{InboundPackage, InboundTransport};
use super::lifecycle::{InstanceLease, LifecycleManager, RequestId};
use super::outbound::{prepare_host_dir, OutboundTransport, RetrievedArtifacts};
use super::result::ResultAssembler;
use super::runtime::ContainerRuntime;
use super::{CodeExecutor, ExecutionRequest, ExecutionResult};
use crate::config::SandboxConfig;
use crate::errors::SandboxError;

/// Runs each request in its own fresh container.
///
/// Holds only the runtime handle and immutable configuration, so one
/// executor can serve any number of concurrent requests.
pub struct SandboxedCodeExecutor {
    config: SandboxConfig,
    runtime: Arc<dyn ContainerRuntime>,
    lifecycle: LifecycleManager,
    inbound: InboundTransport,
    controller: ExecutionController,
    outbound: OutboundTransport,
    assembler: ResultAssembler,
}

impl SandboxedCodeExecutor {
    /// Validates `config`, creates the host directories and takes ownership
    /// of an already opened runtime handle.
    pub fn new(
        config: SandboxConfig,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, SandboxError> {
        config.validate()?;
        config.ensure_directories()?;

        Ok(Self {
            lifecycle: LifecycleManager::new(runtime.clone(), &config),
            inbound: InboundTransport::new(&config),
            controller: ExecutionController::new(&config),
            outbound: OutboundTransport::new(&config.workspace),
            assembler: ResultAssembler::new(config.max_log_length),
            runtime,
            config,
        })
    }

    /// Opens a Docker handle and builds an executor on top of it
    pub async fn connect(config: SandboxConfig) -> Result<Self, SandboxError> {
        let runtime = DockerRuntime::connect().await?;
        log::info!("Connected to Docker, sandbox image {}", config.image);
        Self::new(config, Arc::new(runtime))
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub async fn ping(&self) -> Result<(), SandboxError> {
        self.runtime.ping().await
    }

    /// Releases the runtime handle
    pub async fn close(self) {
        log::info!("Closing sandbox executor");
        drop(self.runtime);
    }

    async fn package(&self, request: &ExecutionRequest) -> Result<InboundPackage, SandboxError> {
        let inbound = self.inbound.clone();
        let code = request.code.clone();
        let inputs = request.input_files.clone();

        tokio::task::spawn_blocking(move || inbound.package(&code, &inputs))
            .await
            .map_err(|e| SandboxError::Internal(format!("Packaging task failed: {}", e)))?
    }

    async fn finish(&self, lease: InstanceLease, request_id: &RequestId) {
        let report = lease.release().await;
        if !report.is_clean() {
            log::warn!(
                "Sandbox request {}: teardown incomplete (state {:?}): {:?}",
                request_id,
                report.final_state,
                report.errors
            );
        }
    }

    async fn run_in_instance(
        &self,
        lease: &mut InstanceLease,
        package: InboundPackage,
        expected: &[String],
        host_dir: &Path,
    ) -> Result<ExecutionResult, SandboxError> {
        self.inbound.inject(self.runtime.as_ref(), lease, package).await?;

        let outcome = self.controller.run(self.runtime.as_ref(), lease).await?;

        // A timed-out instance is killed on release; nothing is collected from it
        let artifacts = if lease.is_forced() {
            RetrievedArtifacts::default()
        } else {
            self.outbound
                .extract_all(self.runtime.as_ref(), lease, expected, host_dir)
                .await
        };

        Ok(self.assembler.assemble(outcome, artifacts))
    }
}

#[async_trait]
impl CodeExecutor for SandboxedCodeExecutor {
    async fn execute_with_cancel(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, SandboxError> {
        let request_id = RequestId::generate(&self.config.name_prefix);
        log::info!(
            "Sandbox request {}: {} input file(s), {} expected output(s)",
            request_id,
            request.input_files.len(),
            request.output_files_expected.len()
        );

        let package = self.package(&request).await?;
        if !package.skipped.is_empty() {
            log::info!(
                "Sandbox request {}: inputs not found and skipped: {:?}",
                request_id,
                package.skipped
            );
        }

        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }

        let mut lease = self.lifecycle.acquire(&request_id).await?;

        // Only a live instance gets a host directory
        let host_dir = match prepare_host_dir(&self.config.output_dir, &request_id).await {
            Ok(dir) => dir,
            Err(e) => {
                self.finish(lease, &request_id).await;
                return Err(e);
            }
        };

        let outcome = tokio::select! {
            result = self.run_in_instance(
                &mut lease,
                package,
                &request.output_files_expected,
                &host_dir,
            ) => Some(result),
            _ = cancel.cancelled() => None,
        };

        let result = match outcome {
            Some(result) => result,
            None => {
                log::warn!("Sandbox request {} cancelled", request_id);
                lease.mark_forced();
                Err(SandboxError::Cancelled)
            }
        };

        self.finish(lease, &request_id).await;

        if result.is_err() {
            // Only removes the directory while nothing was written to it
            if let Err(e) = tokio::fs::remove_dir(&host_dir).await {
                log::debug!("Could not remove {}: {}", host_dir.display(), e);
            }
        }

        let result = result?;
        log::info!(
            "Sandbox request {} finished: status {}, {:.2}s, generated {:?}",
            request_id,
            result.status_code,
            result.execution_time,
            result.files_generated
        );
        Ok(result)
    }
}
