//! Single-flight reference index builds.
//!
//! One build pass at a time works through every reference whose indexes
//! are missing, running the index script for each in an `index-<id>`
//! sandbox. A reference that fails to build stays unbuilt and the pass
//! moves on to the next one.

use std::sync::Arc;
use std::time::Duration;

use alaska_core::analysis::sandbox_name;
use alaska_db::models::reference::Reference;
use alaska_db::WorkRegistry;
use alaska_events::bus::event_types;
use alaska_events::{Notifier, PlatformEvent};
use alaska_sandbox::{Sandbox, SandboxSettings};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::bodies::{require_success, run_sandbox, script_command};
use super::TaskError;
use crate::config::TaskConfig;

/// Sandbox name prefix of index builds.
pub const INDEX_PREFIX: &str = "index";

/// Result of asking for a build pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStart {
    Started,
    /// A pass was already running; nothing new was started.
    Running,
}

pub struct ReferenceBuilder {
    registry: Arc<dyn WorkRegistry>,
    sandbox: Arc<dyn Sandbox>,
    settings: SandboxSettings,
    image: String,
    script: String,
    notifier: Notifier,
    pass: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl ReferenceBuilder {
    pub fn new(
        registry: Arc<dyn WorkRegistry>,
        sandbox: Arc<dyn Sandbox>,
        settings: SandboxSettings,
        tasks: &TaskConfig,
        notifier: Notifier,
    ) -> Self {
        Self {
            registry,
            sandbox,
            settings,
            image: tasks.index_image.clone(),
            script: tasks.index_script.clone(),
            notifier,
            pass: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Start a build pass unless one is already running.
    pub async fn start(self: &Arc<Self>) -> BuildStart {
        let mut pass = self.pass.lock().await;
        if pass.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return BuildStart::Running;
        }
        let builder = Arc::clone(self);
        *pass = Some(tokio::spawn(async move { builder.build_all().await }));
        tracing::info!("Reference build started");
        BuildStart::Started
    }

    pub async fn is_running(&self) -> bool {
        self.pass
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancel the running pass and wait up to `grace` for its sandbox to
    /// stop. Returns whether a pass was interrupted.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.cancel.cancel();
        let Some(handle) = self.pass.lock().await.take() else {
            return false;
        };
        if handle.is_finished() {
            return false;
        }
        if tokio::time::timeout(grace, handle).await.is_err() {
            tracing::warn!("Reference build did not stop in time");
        }
        true
    }

    async fn build_all(&self) {
        let references = match self.registry.list_unbuilt_references().await {
            Ok(references) => references,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list unbuilt references");
                return;
            }
        };
        tracing::info!(count = references.len(), "Building reference indexes");

        for reference in references {
            match self.build_one(&reference).await {
                Ok(()) => {
                    tracing::info!(reference_id = reference.id, "Reference index built");
                    self.notifier.publish(PlatformEvent::reference(
                        event_types::REFERENCE_BUILT,
                        reference.id,
                    ));
                }
                Err(TaskError::Cancelled) => {
                    tracing::info!(reference_id = reference.id, "Reference build cancelled");
                    return;
                }
                Err(e) => {
                    tracing::error!(reference_id = reference.id, error = %e, "Reference build failed");
                    self.notifier.publish(
                        PlatformEvent::reference(event_types::REFERENCE_FAILED, reference.id)
                            .with_payload(json!({ "error": e.to_string() })),
                    );
                }
            }
            if self.cancel.is_cancelled() {
                return;
            }
        }
    }

    async fn build_one(&self, reference: &Reference) -> Result<(), TaskError> {
        let mut spec = self.settings.spec(
            sandbox_name(INDEX_PREFIX, reference.id),
            &self.image,
            script_command(&self.script, [reference.id.to_string()]),
        );
        spec.cpuset = Some(self.settings.cpus.clone());
        let code = run_sandbox(self.sandbox.as_ref(), &spec, &self.cancel).await?;
        require_success("index build", code)?;
        self.registry.mark_reference_ready(reference.id).await?;
        Ok(())
    }
}
