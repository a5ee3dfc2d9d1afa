//! Shared fixtures for worker integration tests: a scripted sandbox, hooks
//! that record every call, and a seeded in-memory registry.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alaska_core::analysis::AnalysisKind;
use alaska_core::paths::{PathKey, ResourcePaths};
use alaska_core::progress::ProjectProgress;
use alaska_core::types::DbId;
use alaska_db::models::analysis::{Analysis, CreateAnalysis};
use alaska_db::models::job::Job;
use alaska_db::models::project::{CreateProject, Project};
use alaska_db::models::sample::Sample;
use alaska_db::{MemoryRegistry, RegistryError, WorkRegistry};
use alaska_events::Notifier;
use alaska_sandbox::{
    Sandbox, SandboxError, SandboxHandle, SandboxRun, SandboxSettings, SandboxSpec,
};
use alaska_worker::dispatcher::DispatcherConfig;
use alaska_worker::{Dispatcher, JobHooks, RegistryJobHooks};
use async_trait::async_trait;
use futures::{FutureExt, StreamExt};

// ---------------------------------------------------------------------------
// Scripted sandbox
// ---------------------------------------------------------------------------

/// How a named sandbox behaves when run.
#[derive(Debug, Clone)]
pub enum Script {
    /// Emit the chunks, then exit with the code.
    Exit { chunks: Vec<Vec<u8>>, code: i64 },
    /// Emit the chunks, then run until stopped.
    Hang { chunks: Vec<Vec<u8>> },
    /// Fail to launch.
    LaunchError(String),
}

impl Script {
    pub fn lines(lines: &[&str], code: i64) -> Self {
        let chunk = lines.iter().map(|l| format!("{l}\n")).collect::<String>();
        Self::Exit {
            chunks: vec![chunk.into_bytes()],
            code,
        }
    }
}

#[derive(Default)]
struct SandboxState {
    scripts: HashMap<String, Script>,
    images: HashSet<String>,
    runs: Vec<SandboxSpec>,
    running: HashSet<String>,
    stops: Vec<String>,
    removes: Vec<(String, bool)>,
}

#[derive(Default, Clone)]
pub struct ScriptedSandbox {
    state: Arc<Mutex<SandboxState>>,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, name: &str, script: Script) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(name.to_string(), script);
    }

    pub fn add_image(&self, image: &str) {
        self.state.lock().unwrap().images.insert(image.to_string());
    }

    pub fn runs(&self) -> Vec<SandboxSpec> {
        self.state.lock().unwrap().runs.clone()
    }

    pub fn stops(&self) -> Vec<String> {
        self.state.lock().unwrap().stops.clone()
    }

    pub fn removes(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().removes.clone()
    }
}

fn chunk_stream(
    chunks: Vec<Vec<u8>>,
) -> impl futures::Stream<Item = Result<Vec<u8>, SandboxError>> + Send + 'static {
    futures::stream::iter(chunks.into_iter().map(Ok))
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn image_exists(&self, image: &str) -> Result<bool, SandboxError> {
        Ok(self.state.lock().unwrap().images.contains(image))
    }

    async fn run(&self, spec: &SandboxSpec) -> Result<SandboxRun, SandboxError> {
        let mut state = self.state.lock().unwrap();
        state.runs.push(spec.clone());
        let script = state
            .scripts
            .get(&spec.name)
            .cloned()
            .unwrap_or_else(|| Script::lines(&[], 0));
        let handle = SandboxHandle::new(spec.name.clone());
        match script {
            Script::Exit { chunks, code } => Ok(SandboxRun {
                handle,
                output: chunk_stream(chunks).boxed(),
                exit: async move { Ok::<_, SandboxError>(code) }.boxed(),
            }),
            Script::Hang { chunks } => {
                state.running.insert(spec.name.clone());
                Ok(SandboxRun {
                    handle,
                    output: chunk_stream(chunks)
                        .chain(futures::stream::pending())
                        .boxed(),
                    exit: futures::future::pending::<Result<i64, SandboxError>>().boxed(),
                })
            }
            Script::LaunchError(message) => Err(SandboxError::Io(std::io::Error::other(message))),
        }
    }

    async fn stop(&self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        let mut state = self.state.lock().unwrap();
        state.stops.push(handle.name.clone());
        if state.running.remove(&handle.name) {
            Ok(())
        } else {
            Err(SandboxError::AlreadyStopped(handle.name.clone()))
        }
    }

    async fn remove(&self, handle: &SandboxHandle, force: bool) -> Result<(), SandboxError> {
        self.state
            .lock()
            .unwrap()
            .removes
            .push((handle.name.clone(), force));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Recording hooks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum HookCall {
    Started(DbId),
    Succeeded(DbId, f64),
    Failed(DbId, String),
}

/// Records each call, then applies the production effects.
pub struct RecordingHooks {
    inner: RegistryJobHooks,
    calls: Mutex<Vec<HookCall>>,
    failing_settles: AtomicUsize,
}

impl RecordingHooks {
    pub fn new(registry: Arc<dyn WorkRegistry>) -> Self {
        Self {
            inner: RegistryJobHooks::new(registry, Notifier::detached()),
            calls: Mutex::new(Vec::new()),
            failing_settles: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` success or failure hooks error before touching the
    /// registry.
    pub fn fail_next_settles(&self, n: usize) {
        self.failing_settles.store(n, Ordering::SeqCst);
    }

    fn settle_outage(&self) -> Result<(), RegistryError> {
        let remaining = self.failing_settles.load(Ordering::SeqCst);
        if remaining == 0 {
            return Ok(());
        }
        self.failing_settles.store(remaining - 1, Ordering::SeqCst);
        Err(RegistryError::Conflict("registry unavailable".into()))
    }

    pub fn calls(&self) -> Vec<HookCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn successes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, HookCall::Succeeded(..)))
            .count()
    }

    pub fn failures(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, HookCall::Failed(..)))
            .count()
    }
}

#[async_trait]
impl JobHooks for RecordingHooks {
    async fn job_started(&self, job: &Job) -> Result<(), RegistryError> {
        self.calls.lock().unwrap().push(HookCall::Started(job.id));
        self.inner.job_started(job).await
    }

    async fn job_succeeded(&self, job: &Job, runtime_secs: f64) -> Result<(), RegistryError> {
        self.calls
            .lock()
            .unwrap()
            .push(HookCall::Succeeded(job.id, runtime_secs));
        self.settle_outage()?;
        self.inner.job_succeeded(job, runtime_secs).await
    }

    async fn job_failed(&self, job: &Job, detail: &str) -> Result<(), RegistryError> {
        self.calls
            .lock()
            .unwrap()
            .push(HookCall::Failed(job.id, detail.to_string()));
        self.settle_outage()?;
        self.inner.job_failed(job, detail).await
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

pub fn settings() -> SandboxSettings {
    SandboxSettings {
        repo_name: "alaska".into(),
        data_volume: "data".into(),
        data_path: "/alaska/data".into(),
        script_volume: "scripts".into(),
        script_path: "/alaska/scripts".into(),
        network: "backend".into(),
        cpus: "0".into(),
        environment: "local".into(),
        forward_env: Vec::new(),
    }
}

pub struct Fixture {
    pub registry: Arc<MemoryRegistry>,
    pub sandbox: ScriptedSandbox,
    pub hooks: Arc<RecordingHooks>,
    pub dispatcher: Arc<Dispatcher>,
    pub root: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_poll_interval(Duration::from_millis(10))
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        let registry = Arc::new(MemoryRegistry::new());
        let sandbox = ScriptedSandbox::new();
        let hooks = Arc::new(RecordingHooks::new(registry.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            Arc::new(sandbox.clone()),
            hooks.clone(),
            settings(),
            DispatcherConfig {
                worker_id: "worker-test".into(),
                poll_interval,
                tail_lines: 5,
            },
        ));
        Self {
            registry,
            sandbox,
            hooks,
            dispatcher,
            root: tempfile::tempdir().unwrap(),
        }
    }

    /// A project at `finalized` whose root lives in the temp directory.
    pub async fn project(&self) -> Project {
        let project = self.registry.insert_project(CreateProject {
            paths: ResourcePaths::new(),
            owner_email: Some("owner@example.org".into()),
        });
        let root = self.root.path().join(project.id.to_string());
        self.registry
            .set_project_path(project.id, &PathKey::Root, &root.to_string_lossy())
            .await
            .unwrap();
        self.registry
            .force_progress(project.id, ProjectProgress::Finalized, None)
            .unwrap();
        self.registry.get_project(project.id).await.unwrap()
    }

    /// A sample of `project` with its own root.
    pub fn sample(&self, project: &Project, name: &str) -> Sample {
        let mut paths = ResourcePaths::new();
        paths.insert(
            PathKey::Root,
            self.root.path().join("samples").join(name).to_string_lossy(),
        );
        self.registry.insert_sample(project.id, name, paths)
    }

    pub fn analysis(&self, code: &str, kind: AnalysisKind, requires: Option<DbId>) -> Analysis {
        self.registry.insert_analysis(CreateAnalysis {
            code: code.to_string(),
            kind,
            image: format!("alaska/{code}"),
            script: format!("python3 -u run_{code}.py"),
            requires_id: requires,
            step: 1,
            active: true,
        })
    }

    /// Create and enqueue a job at the tail of the queue.
    pub async fn enqueue(&self, project: &Project, analysis: &Analysis, archive: bool) -> Job {
        let job = self
            .registry
            .create_job(project.id, analysis.id)
            .await
            .unwrap();
        self.registry.enqueue_job(job.id, archive).await.unwrap()
    }

    pub fn project_dir(&self, project: &Project, code: &str) -> PathBuf {
        self.root.path().join(project.id.to_string()).join(code)
    }
}
