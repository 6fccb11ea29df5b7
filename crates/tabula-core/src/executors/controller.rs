//! Execution controller: runs the injected script inside a live instance.

use futures_util::stream::StreamExt;
use std::time::{Duration, Instant};

use super::lifecycle::InstanceLease;
use super::runtime::{ContainerRuntime, ExecSpec, OutputChunk};
use super::{container_path, normalize_container_path};
use crate::config::SandboxConfig;
use crate::errors::SandboxError;

const EXIT_CODE_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Demultiplexed output, each stream capped at a fixed byte budget
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_dropped: usize,
    pub stderr_dropped: usize,
}

impl CapturedOutput {
    fn push(&mut self, chunk: OutputChunk, limit: usize) {
        let (buffer, dropped, data) = match chunk {
            OutputChunk::Stdout(data) => (&mut self.stdout, &mut self.stdout_dropped, data),
            OutputChunk::Stderr(data) => (&mut self.stderr, &mut self.stderr_dropped, data),
        };
        let room = limit.saturating_sub(buffer.len());
        let take = room.min(data.len());
        buffer.extend_from_slice(&data[..take]);
        *dropped += data.len() - take;
    }
}

#[derive(Debug)]
pub enum ExecOutcome {
    Completed {
        exit_code: i64,
        output: CapturedOutput,
        elapsed: Duration,
    },
    TimedOut {
        output: CapturedOutput,
        elapsed: Duration,
        limit: Duration,
    },
}

impl ExecOutcome {
    pub fn elapsed(&self) -> Duration {
        match self {
            ExecOutcome::Completed { elapsed, .. } | ExecOutcome::TimedOut { elapsed, .. } => {
                *elapsed
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionController {
    command: Vec<String>,
    user: String,
    env: Vec<String>,
    workspace: String,
    timeout: Duration,
    capture_limit: usize,
}

impl ExecutionController {
    pub fn new(config: &SandboxConfig) -> Self {
        let workspace = normalize_container_path(&config.workspace);
        let mut command = config.interpreter.clone();
        command.push(container_path(&workspace, &config.script_name));

        let mut env: Vec<String> = config
            .environment
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        env.sort();

        Self {
            command,
            user: config.user.clone(),
            env,
            workspace,
            timeout: config.timeout(),
            capture_limit: config.capture_limit_bytes,
        }
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Runs the script once. Exceeding the wall-clock bound marks the lease
    /// forced, so releasing it kills the instance.
    pub async fn run(
        &self,
        runtime: &dyn ContainerRuntime,
        lease: &mut InstanceLease,
    ) -> Result<ExecOutcome, SandboxError> {
        let spec = ExecSpec {
            command: self.command.clone(),
            user: self.user.clone(),
            env: self.env.clone(),
            working_dir: self.workspace.clone(),
        };

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let instance_id = lease.id().to_string();
        let start = Instant::now();
        let mut output = CapturedOutput::default();

        let mut session = tokio::select! {
            session = runtime.start_exec(&instance_id, &spec) => session?,
            _ = &mut deadline => return Ok(self.timed_out(lease, output, start)),
        };
        lease.mark_used();

        loop {
            tokio::select! {
                chunk = session.output.next() => match chunk {
                    Some(Ok(chunk)) => output.push(chunk, self.capture_limit),
                    Some(Err(e)) => return Err(e),
                    None => break,
                },
                _ = &mut deadline => return Ok(self.timed_out(lease, output, start)),
            }
        }

        // The stream can close before the runtime reports the exec finished
        let exit_code = loop {
            if let Some(code) = runtime.exec_exit_code(&session.exec_id).await? {
                break code;
            }
            tokio::select! {
                _ = tokio::time::sleep(EXIT_CODE_POLL_INTERVAL) => {}
                _ = &mut deadline => return Ok(self.timed_out(lease, output, start)),
            }
        };
        let elapsed = start.elapsed();

        Ok(ExecOutcome::Completed {
            exit_code,
            output,
            elapsed,
        })
    }

    fn timed_out(&self, lease: &mut InstanceLease, output: CapturedOutput, start: Instant) -> ExecOutcome {
        log::warn!(
            "Execution timed out after {:?} in {}",
            self.timeout,
            lease.name()
        );
        lease.mark_forced();
        ExecOutcome::TimedOut {
            output,
            elapsed: start.elapsed(),
            limit: self.timeout,
        }
    }
}
