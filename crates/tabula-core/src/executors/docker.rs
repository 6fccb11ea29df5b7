// src/executors/docker.rs
use async_trait::async_trait;
use bollard::container::LogOutput; // For LogOutput::StdOut, LogOutput::StdErr
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::models::ContainerCreateBody;
use bollard::query_parameters::{
    CreateContainerOptions as BollardCreateContainerOptionsQuery,
    DownloadFromContainerOptions as BollardDownloadFromContainerOptionsQuery,
    KillContainerOptions as BollardKillContainerOptionsQuery,
    RemoveContainerOptionsBuilder, StartContainerOptions as BollardStartContainerOptionsQuery,
    StopContainerOptionsBuilder,
    UploadToContainerOptions as BollardUploadToContainerOptionsQuery,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::time::Duration;

use super::runtime::{ContainerRuntime, ExecSession, ExecSpec, InstanceSpec, OutputChunk};
use crate::errors::SandboxError;

/// `ContainerRuntime` backed by the local Docker daemon
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects with the local defaults (`DOCKER_HOST` or the default socket)
    /// and checks that the daemon answers.
    pub async fn connect() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            SandboxError::RuntimeUnavailable(format!("Failed to connect to Docker: {}", e))
        })?;
        let runtime = Self { docker };
        runtime.ping().await?;
        Ok(runtime)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), SandboxError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| SandboxError::RuntimeUnavailable(format!("Docker ping failed: {}", e)))
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> Result<String, SandboxError> {
        let options = Some(BollardCreateContainerOptionsQuery {
            name: Some(spec.name.clone()),
            ..Default::default()
        });

        let config = ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            working_dir: Some(spec.working_dir.clone()),
            tty: Some(false),
            ..Default::default()
        };

        let container = self
            .docker
            .create_container(options, config)
            .await
            .map_err(|e| {
                SandboxError::InstanceStart(format!(
                    "Failed to create container {} from image {}: {}",
                    spec.name, spec.image, e
                ))
            })?;

        for warning in &container.warnings {
            log::warn!("Docker warning for container {}: {}", spec.name, warning);
        }

        Ok(container.id)
    }

    async fn start_instance(&self, id: &str) -> Result<(), SandboxError> {
        self.docker
            .start_container(id, None::<BollardStartContainerOptionsQuery>)
            .await
            .map_err(|e| {
                SandboxError::InstanceStart(format!("Failed to start container {}: {}", id, e))
            })
    }

    async fn upload_archive(
        &self,
        id: &str,
        destination: &str,
        archive: Vec<u8>,
    ) -> Result<(), SandboxError> {
        let options = Some(BollardUploadToContainerOptionsQuery {
            path: destination.to_string(),
            ..Default::default()
        });

        self.docker
            .upload_to_container(id, options, bollard::body_full(archive.into()))
            .await
            .map_err(|e| {
                SandboxError::Injection(format!(
                    "Failed to upload archive to {}:{}: {}",
                    id, destination, e
                ))
            })
    }

    async fn start_exec(&self, id: &str, spec: &ExecSpec) -> Result<ExecSession, SandboxError> {
        let options = CreateExecOptions {
            cmd: Some(spec.command.clone()),
            user: Some(spec.user.clone()),
            env: Some(spec.env.clone()),
            working_dir: Some(spec.working_dir.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id, options)
            .await
            .map_err(|e| SandboxError::Exec(format!("Failed to create exec in {}: {}", id, e)))?;

        let started = self
            .docker
            .start_exec(&exec.id, None::<StartExecOptions>)
            .await
            .map_err(|e| SandboxError::Exec(format!("Failed to start exec {}: {}", exec.id, e)))?;

        match started {
            StartExecResults::Attached { output, .. } => {
                let output = output
                    .filter_map(|item| async move {
                        match item {
                            Ok(LogOutput::StdOut { message }) => {
                                Some(Ok(OutputChunk::Stdout(message.to_vec())))
                            }
                            Ok(LogOutput::StdErr { message }) => {
                                Some(Ok(OutputChunk::Stderr(message.to_vec())))
                            }
                            // Only attached stdout/stderr are expected without a tty
                            Ok(_) => None,
                            Err(e) => Some(Err(SandboxError::Exec(format!(
                                "Exec output stream failed: {}",
                                e
                            )))),
                        }
                    })
                    .boxed();

                Ok(ExecSession {
                    exec_id: exec.id,
                    output,
                })
            }
            StartExecResults::Detached => Err(SandboxError::Exec(format!(
                "Exec {} started detached, output cannot be captured",
                exec.id
            ))),
        }
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, SandboxError> {
        let inspect = self.docker.inspect_exec(exec_id).await.map_err(|e| {
            SandboxError::Exec(format!("Failed to inspect exec {}: {}", exec_id, e))
        })?;

        if inspect.running.unwrap_or(false) {
            return Ok(None);
        }
        let exit_code = inspect.exit_code.unwrap_or_else(|| {
            log::warn!("Exec {} finished without an exit code, assuming failure", exec_id);
            1
        });
        Ok(Some(exit_code))
    }

    async fn download_archive(&self, id: &str, path: &str) -> Result<Vec<u8>, SandboxError> {
        let options = BollardDownloadFromContainerOptionsQuery {
            path: path.to_string(),
        };
        let mut stream = self.docker.download_from_container(id, Some(options));
        let mut archive_data = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                SandboxError::Retrieval(format!("Failed to download {}:{}: {}", id, path, e))
            })?;
            archive_data.extend_from_slice(&chunk);
        }

        Ok(archive_data)
    }

    async fn stop_instance(&self, id: &str, grace: Duration) -> Result<(), SandboxError> {
        let options = StopContainerOptionsBuilder::default()
            .t(grace.as_secs().min(i32::MAX as u64) as i32)
            .build();

        self.docker
            .stop_container(id, Some(options))
            .await
            .map_err(|e| SandboxError::Teardown(format!("Failed to stop container {}: {}", id, e)))
    }

    async fn kill_instance(&self, id: &str) -> Result<(), SandboxError> {
        // No options means SIGKILL
        self.docker
            .kill_container(id, None::<BollardKillContainerOptionsQuery>)
            .await
            .map_err(|e| SandboxError::Teardown(format!("Failed to kill container {}: {}", id, e)))
    }

    async fn remove_instance(&self, id: &str, force: bool) -> Result<(), SandboxError> {
        let options = RemoveContainerOptionsBuilder::default().force(force).build();

        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| {
                SandboxError::Teardown(format!("Failed to remove container {}: {}", id, e))
            })
    }
}
