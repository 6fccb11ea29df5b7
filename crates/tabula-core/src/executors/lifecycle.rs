//! Sandbox instance lifecycle.
//!
//! `LifecycleManager::acquire` hands out an `InstanceLease` as soon as the
//! container exists, so every later failure has a lease to release. Release
//! is best effort and reports what happened as a `TeardownReport` instead of
//! an error. A lease dropped without being released (the request future was
//! cancelled) schedules the same teardown on the current Tokio runtime.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::runtime::{ContainerRuntime, InstanceSpec};
use crate::config::SandboxConfig;
use crate::errors::SandboxError;

/// Per-request identity, used as container name and output directory name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{}-{}", prefix, Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Created,
    Running,
    Used,
    Stopped,
    Removed,
}

#[derive(Debug, Clone)]
struct SandboxInstance {
    id: String,
    name: String,
    state: InstanceState,
    /// Set after a timeout or cancellation: kill instead of a graceful stop
    forced: bool,
}

/// What teardown managed to do. Never turned into an error.
#[derive(Debug)]
pub struct TeardownReport {
    pub instance: String,
    pub final_state: InstanceState,
    pub errors: Vec<SandboxError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.final_state == InstanceState::Removed
    }
}

pub struct LifecycleManager {
    runtime: Arc<dyn ContainerRuntime>,
    image: String,
    workspace: String,
    stop_grace: Duration,
}

impl LifecycleManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: &SandboxConfig) -> Self {
        Self {
            runtime,
            image: config.image.clone(),
            workspace: super::normalize_container_path(&config.workspace),
            stop_grace: config.stop_grace(),
        }
    }

    /// Creates and starts an idle instance named after `request_id`.
    pub async fn acquire(&self, request_id: &RequestId) -> Result<InstanceLease, SandboxError> {
        let spec = InstanceSpec {
            name: request_id.to_string(),
            image: self.image.clone(),
            working_dir: self.workspace.clone(),
            command: vec![
                "tail".to_string(),
                "-f".to_string(),
                "/dev/null".to_string(),
            ],
        };

        let id = self.runtime.create_instance(&spec).await?;
        let mut lease = InstanceLease {
            runtime: self.runtime.clone(),
            stop_grace: self.stop_grace,
            instance: Some(SandboxInstance {
                id,
                name: spec.name,
                state: InstanceState::Created,
                forced: false,
            }),
        };

        if let Err(e) = self.runtime.start_instance(lease.id()).await {
            let report = lease.release().await;
            if !report.is_clean() {
                log::warn!(
                    "Cleanup after failed start of {} was incomplete: {:?}",
                    report.instance,
                    report.errors
                );
            }
            return Err(e);
        }

        lease.set_state(InstanceState::Running);
        log::debug!("Sandbox instance {} is running", lease.name());
        Ok(lease)
    }
}

/// Exclusive handle on one live instance
pub struct InstanceLease {
    runtime: Arc<dyn ContainerRuntime>,
    stop_grace: Duration,
    instance: Option<SandboxInstance>,
}

impl InstanceLease {
    /// Runtime id of the instance
    pub fn id(&self) -> &str {
        self.instance.as_ref().map(|i| i.id.as_str()).unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.instance.as_ref().map(|i| i.name.as_str()).unwrap_or_default()
    }

    pub fn state(&self) -> InstanceState {
        self.instance
            .as_ref()
            .map(|i| i.state)
            .unwrap_or(InstanceState::Removed)
    }

    pub fn is_forced(&self) -> bool {
        self.instance.as_ref().map(|i| i.forced).unwrap_or(false)
    }

    pub(crate) fn mark_used(&mut self) {
        self.set_state(InstanceState::Used);
    }

    /// The instance will be killed rather than stopped gracefully.
    pub(crate) fn mark_forced(&mut self) {
        if let Some(instance) = self.instance.as_mut() {
            instance.forced = true;
        }
    }

    fn set_state(&mut self, state: InstanceState) {
        if let Some(instance) = self.instance.as_mut() {
            instance.state = state;
        }
    }

    /// Stops and removes the instance.
    ///
    /// Teardown runs as its own task, so it completes even if the future
    /// awaiting this call is dropped midway.
    pub async fn release(mut self) -> TeardownReport {
        let Some(instance) = self.instance.take() else {
            return TeardownReport {
                instance: String::new(),
                final_state: InstanceState::Removed,
                errors: Vec::new(),
            };
        };

        let name = instance.name.clone();
        let state = instance.state;
        let task = tokio::spawn(teardown(self.runtime.clone(), instance, self.stop_grace));
        match task.await {
            Ok(report) => report,
            Err(e) => TeardownReport {
                instance: name,
                final_state: state,
                errors: vec![SandboxError::Internal(format!("Teardown task failed: {}", e))],
            },
        }
    }
}

impl Drop for InstanceLease {
    fn drop(&mut self) {
        let Some(mut instance) = self.instance.take() else {
            return;
        };
        instance.forced = true;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                log::warn!(
                    "Sandbox instance {} dropped without release, tearing down in background",
                    instance.name
                );
                let runtime = self.runtime.clone();
                let grace = self.stop_grace;
                handle.spawn(async move {
                    let report = teardown(runtime, instance, grace).await;
                    if !report.is_clean() {
                        log::warn!(
                            "Background teardown of {} incomplete: {:?}",
                            report.instance,
                            report.errors
                        );
                    }
                });
            }
            Err(_) => {
                log::error!(
                    "Sandbox instance {} ({}) leaked: no async runtime available for teardown",
                    instance.name,
                    instance.id
                );
            }
        }
    }
}

async fn teardown(
    runtime: Arc<dyn ContainerRuntime>,
    mut instance: SandboxInstance,
    grace: Duration,
) -> TeardownReport {
    let mut errors = Vec::new();

    // A created-but-never-started container has nothing to stop
    if instance.state != InstanceState::Created {
        let stopped = if instance.forced {
            runtime.kill_instance(&instance.id).await
        } else {
            runtime.stop_instance(&instance.id, grace).await
        };
        match stopped {
            Ok(()) => instance.state = InstanceState::Stopped,
            Err(e) => {
                log::warn!("Failed to stop sandbox instance {}: {}", instance.name, e);
                errors.push(e);
            }
        }
    }

    // Force removal whenever the instance may still be running
    let force = instance.forced || instance.state != InstanceState::Stopped;
    match runtime.remove_instance(&instance.id, force).await {
        Ok(()) => instance.state = InstanceState::Removed,
        Err(e) => {
            log::warn!("Failed to remove sandbox instance {}: {}", instance.name, e);
            errors.push(e);
        }
    }

    log::debug!(
        "Sandbox instance {} torn down (final state {:?})",
        instance.name,
        instance.state
    );

    TeardownReport {
        instance: instance.name,
        final_state: instance.state,
        errors,
    }
}
