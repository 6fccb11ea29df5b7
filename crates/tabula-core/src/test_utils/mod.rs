//! In-memory container runtime for exercising the engine without Docker.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::errors::SandboxError;
use crate::executors::runtime::{
    ContainerRuntime, ExecSession, ExecSpec, InstanceSpec, OutputChunk,
};

/// What the simulated interpreter did
#[derive(Debug, Clone, Default)]
pub struct FakeRun {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Time before any output is produced
    pub delay: Duration,
}

impl FakeRun {
    pub fn ok(stdout: &str) -> Self {
        Self {
            stdout: stdout.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    pub fn failed(exit_code: i64, stderr: &str) -> Self {
        Self {
            exit_code,
            stderr: stderr.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    pub fn sleeping(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }
}

/// Simulated script: sees and mutates the workspace files by relative name
pub type Behavior = Arc<dyn Fn(&mut HashMap<String, Vec<u8>>) -> FakeRun + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Create,
    Start,
    Upload,
    Exec,
    Download,
    Stop,
    Remove,
}

#[derive(Debug, Default)]
struct FakeInstance {
    name: String,
    workspace: String,
    files: HashMap<String, Vec<u8>>,
    running: bool,
    removed: bool,
}

#[derive(Default)]
struct FakeState {
    next_id: usize,
    instances: HashMap<String, FakeInstance>,
    exit_codes: HashMap<String, i64>,
    exit_polls: HashMap<String, usize>,
    created: usize,
    removed: usize,
    killed: usize,
    exec_commands: Vec<Vec<String>>,
    double_removals: usize,
}

pub struct FakeRuntime {
    behavior: Behavior,
    faults: HashSet<Fault>,
    stop_delay: Duration,
    running_polls: usize,
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new<F>(behavior: F) -> Self
    where
        F: Fn(&mut HashMap<String, Vec<u8>>) -> FakeRun + Send + Sync + 'static,
    {
        Self {
            behavior: Arc::new(behavior),
            faults: HashSet::new(),
            stop_delay: Duration::ZERO,
            running_polls: 0,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.insert(fault);
        self
    }

    /// Graceful stops take this long, like a PID 1 that ignores SIGTERM
    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = delay;
        self
    }

    /// Each exec still reports running for this many inspections after its
    /// output has closed
    pub fn with_running_polls(mut self, polls: usize) -> Self {
        self.running_polls = polls;
        self
    }

    pub fn created(&self) -> usize {
        self.state.lock().unwrap().created
    }

    pub fn removed(&self) -> usize {
        self.state.lock().unwrap().removed
    }

    pub fn killed(&self) -> usize {
        self.state.lock().unwrap().killed
    }

    pub fn double_removals(&self) -> usize {
        self.state.lock().unwrap().double_removals
    }

    pub fn instance_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state.instances.values().map(|i| i.name.clone()).collect();
        names.sort();
        names
    }

    pub fn exec_commands(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().exec_commands.clone()
    }

    fn fail(&self, fault: Fault) -> Option<SandboxError> {
        if !self.faults.contains(&fault) {
            return None;
        }
        let message = format!("injected {:?} fault", fault);
        Some(match fault {
            Fault::Create | Fault::Start => SandboxError::InstanceStart(message),
            Fault::Upload => SandboxError::Injection(message),
            Fault::Exec => SandboxError::Exec(message),
            Fault::Download => SandboxError::Retrieval(message),
            Fault::Stop | Fault::Remove => SandboxError::Teardown(message),
        })
    }

    fn relative_to_workspace(workspace: &str, path: &str) -> Option<String> {
        path.strip_prefix(workspace)
            .map(|rest| rest.trim_start_matches('/').to_string())
            .filter(|rest| !rest.is_empty())
    }
}

fn single_file_archive(name: &str, data: &[u8]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    builder
        .append_data(&mut header, name, data)
        .expect("in-memory tar write");
    builder.into_inner().expect("in-memory tar finish")
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> Result<String, SandboxError> {
        if let Some(e) = self.fail(Fault::Create) {
            return Err(e);
        }
        let mut state = self.state.lock().unwrap();
        if state.instances.values().any(|i| i.name == spec.name) {
            return Err(SandboxError::InstanceStart(format!(
                "Conflict: container name {} already in use",
                spec.name
            )));
        }
        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);
        state.instances.insert(
            id.clone(),
            FakeInstance {
                name: spec.name.clone(),
                workspace: spec.working_dir.clone(),
                ..Default::default()
            },
        );
        state.created += 1;
        Ok(id)
    }

    async fn start_instance(&self, id: &str) -> Result<(), SandboxError> {
        if let Some(e) = self.fail(Fault::Start) {
            return Err(e);
        }
        let mut state = self.state.lock().unwrap();
        let instance = state
            .instances
            .get_mut(id)
            .ok_or_else(|| SandboxError::InstanceStart(format!("No such container: {}", id)))?;
        instance.running = true;
        Ok(())
    }

    async fn upload_archive(
        &self,
        id: &str,
        destination: &str,
        archive: Vec<u8>,
    ) -> Result<(), SandboxError> {
        if let Some(e) = self.fail(Fault::Upload) {
            return Err(e);
        }
        let mut state = self.state.lock().unwrap();
        let instance = state
            .instances
            .get_mut(id)
            .ok_or_else(|| SandboxError::Injection(format!("No such container: {}", id)))?;
        if destination != instance.workspace {
            return Err(SandboxError::Injection(format!(
                "Unexpected upload destination {}",
                destination
            )));
        }

        let mut archive = tar::Archive::new(archive.as_slice());
        let entries = archive
            .entries()
            .map_err(|e| SandboxError::Injection(e.to_string()))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| SandboxError::Injection(e.to_string()))?;
            let name = entry
                .path()
                .map_err(|e| SandboxError::Injection(e.to_string()))?
                .to_string_lossy()
                .to_string();
            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .map_err(|e| SandboxError::Injection(e.to_string()))?;
            instance.files.insert(name, data);
        }
        Ok(())
    }

    async fn start_exec(&self, id: &str, spec: &ExecSpec) -> Result<ExecSession, SandboxError> {
        if let Some(e) = self.fail(Fault::Exec) {
            return Err(e);
        }
        let run = {
            let mut state = self.state.lock().unwrap();
            state.exec_commands.push(spec.command.clone());
            let instance = state
                .instances
                .get_mut(id)
                .ok_or_else(|| SandboxError::Exec(format!("No such container: {}", id)))?;
            if !instance.running {
                return Err(SandboxError::Exec(format!("Container {} is not running", id)));
            }
            let run = (self.behavior)(&mut instance.files);
            let exec_id = format!("{}-exec-{}", id, state.exec_commands.len());
            state.exit_codes.insert(exec_id.clone(), run.exit_code);
            (exec_id, run)
        };
        let (exec_id, run) = run;

        let mut chunks = Vec::new();
        if !run.stdout.is_empty() {
            chunks.push(Ok(OutputChunk::Stdout(run.stdout)));
        }
        if !run.stderr.is_empty() {
            chunks.push(Ok(OutputChunk::Stderr(run.stderr)));
        }
        let delay = run.delay;
        let output = stream::once(async move {
            tokio::time::sleep(delay).await;
            stream::iter(chunks)
        })
        .flatten()
        .boxed();

        Ok(ExecSession { exec_id, output })
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>, SandboxError> {
        let mut state = self.state.lock().unwrap();
        let polls = state.exit_polls.entry(exec_id.to_string()).or_insert(0);
        *polls += 1;
        if *polls <= self.running_polls {
            return Ok(None);
        }
        Ok(state.exit_codes.get(exec_id).copied())
    }

    async fn download_archive(&self, id: &str, path: &str) -> Result<Vec<u8>, SandboxError> {
        if let Some(e) = self.fail(Fault::Download) {
            return Err(e);
        }
        let state = self.state.lock().unwrap();
        let instance = state
            .instances
            .get(id)
            .filter(|i| !i.removed)
            .ok_or_else(|| SandboxError::Retrieval(format!("No such container: {}", id)))?;
        let relative = Self::relative_to_workspace(&instance.workspace, path)
            .ok_or_else(|| SandboxError::Retrieval(format!("Could not find the file {}", path)))?;
        let data = instance
            .files
            .get(&relative)
            .ok_or_else(|| SandboxError::Retrieval(format!("Could not find the file {}", path)))?;
        let base_name = relative.rsplit('/').next().unwrap_or(&relative);
        Ok(single_file_archive(base_name, data))
    }

    async fn stop_instance(&self, id: &str, _grace: Duration) -> Result<(), SandboxError> {
        if let Some(e) = self.fail(Fault::Stop) {
            return Err(e);
        }
        tokio::time::sleep(self.stop_delay).await;
        let mut state = self.state.lock().unwrap();
        if let Some(instance) = state.instances.get_mut(id) {
            instance.running = false;
        }
        Ok(())
    }

    async fn kill_instance(&self, id: &str) -> Result<(), SandboxError> {
        let mut state = self.state.lock().unwrap();
        state.killed += 1;
        if let Some(instance) = state.instances.get_mut(id) {
            instance.running = false;
        }
        Ok(())
    }

    async fn remove_instance(&self, id: &str, _force: bool) -> Result<(), SandboxError> {
        if let Some(e) = self.fail(Fault::Remove) {
            return Err(e);
        }
        let mut state = self.state.lock().unwrap();
        let already_removed = match state.instances.get_mut(id) {
            Some(instance) if !instance.removed => {
                instance.removed = true;
                instance.running = false;
                false
            }
            _ => true,
        };
        if already_removed {
            state.double_removals += 1;
            return Err(SandboxError::Teardown(format!("No such container: {}", id)));
        }
        state.removed += 1;
        Ok(())
    }
}
