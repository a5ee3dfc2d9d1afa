//! Shared fixtures for API integration tests: a scripted sandbox, a task
//! body gated by the test, and an app wired to an in-memory registry.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alaska_api::config::{ApiConfig, GeoFtpConfig, TaskConfig};
use alaska_api::router::build_app_router;
use alaska_api::state::AppState;
use alaska_api::tasks::{ReferenceBuilder, TaskBody, TaskError, TaskKind, TaskSupervisor};
use alaska_core::analysis::AnalysisKind;
use alaska_core::progress::ProjectProgress;
use alaska_core::types::DbId;
use alaska_db::models::analysis::{Analysis, CreateAnalysis};
use alaska_db::models::project::{CreateProject, Project};
use alaska_db::{MemoryRegistry, WorkRegistry};
use alaska_events::bus::PlatformEvent;
use alaska_events::{EventBus, Notifier};
use alaska_sandbox::{
    Sandbox, SandboxError, SandboxHandle, SandboxRun, SandboxSettings, SandboxSpec,
};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use futures::{FutureExt, StreamExt};
use http_body_util::BodyExt;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Scripted sandbox
// ---------------------------------------------------------------------------

type Chunk = Result<Vec<u8>, SandboxError>;

/// How a named sandbox behaves when run. Unscripted names exit 0 at once.
#[derive(Debug, Clone, Copy)]
pub enum Script {
    Exit(i64),
    /// Run until stopped, then exit 137.
    Hang,
}

#[derive(Default)]
struct SandboxState {
    scripts: HashMap<String, Script>,
    runs: Vec<SandboxSpec>,
    running: HashMap<String, CancellationToken>,
    stops: Vec<String>,
    removes: Vec<(String, bool)>,
}

#[derive(Default, Clone)]
pub struct ScriptedSandbox {
    state: Arc<Mutex<SandboxState>>,
}

impl ScriptedSandbox {
    pub fn script(&self, name: &str, script: Script) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(name.to_string(), script);
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

    pub fn is_running(&self, name: &str) -> bool {
        self.state.lock().unwrap().running.contains_key(name)
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn image_exists(&self, _image: &str) -> Result<bool, SandboxError> {
        Ok(true)
    }

    async fn run(&self, spec: &SandboxSpec) -> Result<SandboxRun, SandboxError> {
        let mut state = self.state.lock().unwrap();
        state.runs.push(spec.clone());
        let script = state
            .scripts
            .get(&spec.name)
            .copied()
            .unwrap_or(Script::Exit(0));
        let handle = SandboxHandle::new(spec.name.clone());
        let banner = futures::stream::iter([Ok::<_, SandboxError>(
            format!("{} up\n", spec.name).into_bytes(),
        )]);
        match script {
            Script::Exit(code) => Ok(SandboxRun {
                handle,
                output: banner.boxed(),
                exit: async move { Ok::<_, SandboxError>(code) }.boxed(),
            }),
            Script::Hang => {
                let stopped = CancellationToken::new();
                state.running.insert(spec.name.clone(), stopped.clone());
                let closed = stopped.clone();
                let until_stopped = futures::stream::once(async move { closed.cancelled().await })
                    .filter_map(|()| futures::future::ready(None::<Chunk>));
                Ok(SandboxRun {
                    handle,
                    output: banner.chain(until_stopped).boxed(),
                    exit: async move {
                        stopped.cancelled().await;
                        Ok::<_, SandboxError>(137)
                    }
                    .boxed(),
                })
            }
        }
    }

    async fn stop(&self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        let mut state = self.state.lock().unwrap();
        state.stops.push(handle.name.clone());
        match state.running.remove(&handle.name) {
            Some(stopped) => {
                stopped.cancel();
                Ok(())
            }
            None => Err(SandboxError::NotFound(handle.name.clone())),
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
// Gated task body
// ---------------------------------------------------------------------------

/// What a [`GatedBody`] does once released.
#[derive(Debug, Clone)]
pub enum Ending {
    Succeed,
    Fail(String),
    Panic,
}

/// A task body that blocks until the test releases it. Cancellation ends it
/// early unless `ignore_cancel` is set.
pub struct GatedBody {
    gate: Arc<Notify>,
    ending: Ending,
    ignore_cancel: bool,
}

impl GatedBody {
    pub fn new(ending: Ending) -> (Arc<Self>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let body = Arc::new(Self {
            gate: Arc::clone(&gate),
            ending,
            ignore_cancel: false,
        });
        (body, gate)
    }

    /// A body that never finishes and ignores cancellation.
    pub fn stubborn() -> Arc<Self> {
        Arc::new(Self {
            gate: Arc::new(Notify::new()),
            ending: Ending::Succeed,
            ignore_cancel: true,
        })
    }
}

#[async_trait]
impl TaskBody for GatedBody {
    async fn run(&self, _project: &Project, cancel: CancellationToken) -> Result<(), TaskError> {
        if self.ignore_cancel {
            std::future::pending::<()>().await;
        }
        tokio::select! {
            () = self.gate.notified() => {}
            () = cancel.cancelled() => return Err(TaskError::Cancelled),
        }
        match &self.ending {
            Ending::Succeed => Ok(()),
            Ending::Fail(message) => Err(TaskError::Failed(message.clone())),
            Ending::Panic => panic!("body exploded"),
        }
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

pub fn config(project_root: PathBuf) -> ApiConfig {
    ApiConfig {
        database_url: "postgres://unused".into(),
        host: "127.0.0.1".into(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".into()],
        request_timeout_secs: 30,
        project_root,
        tasks: TaskConfig {
            script_image: "alaska/script".into(),
            compile_script: "python3 -u compile.py".into(),
            upload_script: "python3 -u upload.py".into(),
            session_image: "alaska/diff".into(),
            session_script: "Rscript shiny.R".into(),
            index_image: "alaska/index".into(),
            index_script: "python3 -u build_index.py".into(),
            geo_ftp: Some(GeoFtpConfig {
                host: "ftp.example.org".into(),
                user: "geoftp".into(),
                password: "s3cret".into(),
            }),
        },
    }
}

pub struct Fixture {
    pub registry: Arc<MemoryRegistry>,
    pub sandbox: ScriptedSandbox,
    pub supervisor: Arc<TaskSupervisor>,
    pub references: Arc<ReferenceBuilder>,
    pub events: Mutex<broadcast::Receiver<PlatformEvent>>,
    pub config: ApiConfig,
    pub root: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self::with_config(config(root.path().join("projects")), root)
    }

    pub fn with_config(config: ApiConfig, root: tempfile::TempDir) -> Self {
        let registry = Arc::new(MemoryRegistry::new());
        let bus = Arc::new(EventBus::default());
        let events = Mutex::new(bus.subscribe());
        let notifier = Notifier::new(bus, None, "local");
        let sandbox = ScriptedSandbox::default();
        let references = Arc::new(ReferenceBuilder::new(
            registry.clone(),
            Arc::new(sandbox.clone()),
            settings(),
            &config.tasks,
            notifier.clone(),
        ));
        let supervisor = Arc::new(TaskSupervisor::new(registry.clone(), notifier));
        Self {
            registry,
            sandbox,
            supervisor,
            references,
            events,
            config,
            root,
        }
    }

    pub fn app(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            sandbox: Arc::new(self.sandbox.clone()),
            supervisor: Arc::clone(&self.supervisor),
            references: Arc::clone(&self.references),
            config: Arc::new(self.config.clone()),
            settings: Arc::new(settings()),
        };
        build_app_router(state, &self.config)
    }

    /// A project forced to `progress`.
    pub fn project_at(&self, progress: ProjectProgress) -> Project {
        let project = self.registry.insert_project(CreateProject {
            owner_email: Some("owner@example.org".into()),
            ..CreateProject::default()
        });
        self.registry
            .force_progress(project.id, progress, None)
            .unwrap();
        project
    }

    pub fn analysis(&self, code: &str, step: i32) -> Analysis {
        self.registry.insert_analysis(CreateAnalysis {
            code: code.to_string(),
            kind: AnalysisKind::Project,
            image: format!("alaska/{code}"),
            script: format!("python3 -u run_{code}.py"),
            requires_id: None,
            step,
            active: true,
        })
    }

    pub async fn progress(&self, project_id: DbId) -> String {
        self.registry.get_project(project_id).await.unwrap().progress
    }

    /// Wait until the `kind` task of a project is no longer alive.
    pub async fn settle(&self, project_id: DbId, kind: TaskKind) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.supervisor.is_running(project_id, kind).await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("task never finished");
    }

    /// Wait until the reference build pass has finished.
    pub async fn settle_references(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.references.is_running().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("reference build never finished");
    }

    /// Wait until a hanging sandbox has been launched.
    pub async fn wait_running(&self, sandbox: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.sandbox.is_running(sandbox) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sandbox never launched");
    }

    /// Event types published so far, in order.
    pub fn event_types(&self) -> Vec<String> {
        let mut rx = self.events.lock().unwrap();
        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            types.push(event.event_type);
        }
        types
    }

    /// Drain published events.
    pub fn drain_events(&self) -> Vec<PlatformEvent> {
        let mut rx = self.events.lock().unwrap();
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub async fn send(
    app: Router,
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => request
            .header("content-type", "application/json")
            .body(Body::from(json.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

pub async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, Method::GET, uri, None).await
}

pub async fn post(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, Method::POST, uri, None).await
}

pub async fn post_json(
    app: Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    send(app, Method::POST, uri, Some(body)).await
}
