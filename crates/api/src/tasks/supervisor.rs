//! Single-flight task supervisor.
//!
//! [`TaskSupervisor`] keeps a handle for every task it has started, keyed
//! by (project, kind). A start request is refused while the previous task
//! for the same key is still alive; finished handles stay in the map so
//! liveness queries keep working, and a later start simply replaces them.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alaska_core::types::DbId;
use alaska_db::models::project::Project;
use alaska_db::WorkRegistry;
use alaska_events::bus::event_types;
use alaska_events::{Notifier, PlatformEvent};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{TaskBody, TaskError, TaskKind};

type TaskKey = (DbId, TaskKind);

/// Bookkeeping for one started task.
struct ManagedTask {
    handle: JoinHandle<()>,
    /// Child of the supervisor's master token.
    cancel: CancellationToken,
}

impl ManagedTask {
    fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }
}

pub struct TaskSupervisor {
    registry: Arc<dyn WorkRegistry>,
    notifier: Notifier,
    tasks: Mutex<HashMap<TaskKey, ManagedTask>>,
    /// Master cancellation token, cancelled during shutdown.
    cancel: CancellationToken,
}

impl TaskSupervisor {
    pub fn new(registry: Arc<dyn WorkRegistry>, notifier: Notifier) -> Self {
        Self {
            registry,
            notifier,
            tasks: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Start `body` as the `kind` task of a project without waiting for it.
    ///
    /// Fails with [`TaskError::AlreadyRunning`] if a task for the same key
    /// is alive, and with [`TaskError::Conflict`] if the project is not at a
    /// checkpoint the kind may start from. Neither failure changes any
    /// state. On success the project is already at the kind's running
    /// checkpoint when this returns.
    pub async fn start(
        &self,
        project_id: DbId,
        kind: TaskKind,
        body: Arc<dyn TaskBody>,
    ) -> Result<(), TaskError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.get(&(project_id, kind)).is_some_and(ManagedTask::is_alive) {
            return Err(TaskError::AlreadyRunning { project_id, kind });
        }

        let project = match kind.checkpoints() {
            Some(checkpoints) => self
                .registry
                .transition_progress(project_id, checkpoints.from, checkpoints.running)
                .await?
                .ok_or_else(|| {
                    TaskError::Conflict(format!(
                        "project {project_id} cannot start {kind} from its current checkpoint"
                    ))
                })?,
            None => self.registry.get_project(project_id).await?,
        };

        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(drive(
            Arc::clone(&self.registry),
            self.notifier.clone(),
            project,
            kind,
            body,
            cancel.clone(),
        ));
        tasks.insert((project_id, kind), ManagedTask { handle, cancel });

        tracing::info!(project_id, kind = %kind, "Task started");
        Ok(())
    }

    /// Whether the `kind` task of a project is still running.
    pub async fn is_running(&self, project_id: DbId, kind: TaskKind) -> bool {
        self.tasks
            .lock()
            .await
            .get(&(project_id, kind))
            .is_some_and(ManagedTask::is_alive)
    }

    /// Cancel every live task, wait up to `grace` for each to settle, and
    /// roll back the checkpoint of any that did not.
    ///
    /// Returns how many tasks were interrupted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        tracing::info!("Shutting down task supervisor");
        self.cancel.cancel();

        let mut tasks = self.tasks.lock().await;
        let mut interrupted = 0;
        for ((project_id, kind), task) in tasks.drain() {
            if !task.is_alive() {
                continue;
            }
            interrupted += 1;
            task.cancel.cancel();
            if tokio::time::timeout(grace, task.handle).await.is_err() {
                tracing::warn!(project_id, kind = %kind, "Task did not stop in time");
            }
            if let Some(checkpoints) = kind.checkpoints() {
                match self
                    .registry
                    .rollback_progress(project_id, checkpoints.running)
                    .await
                {
                    Ok(Some(project)) => {
                        tracing::info!(
                            project_id,
                            progress = %project.progress,
                            "Checkpoint rolled back"
                        );
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(project_id, error = %e, "Failed to roll back checkpoint");
                    }
                }
            }
        }
        tracing::info!(interrupted, "Task supervisor shut down");
        interrupted
    }
}

fn task_event(event_type: &str, project_id: DbId, kind: TaskKind) -> PlatformEvent {
    PlatformEvent::project(event_type, project_id)
        .with_payload(json!({ "task": kind.as_str() }))
}

/// Run one task body and settle the project checkpoint either way.
///
/// The body runs on a task of its own so a panic surfaces here as a
/// [`TaskError::Panicked`] instead of escaping.
async fn drive(
    registry: Arc<dyn WorkRegistry>,
    notifier: Notifier,
    project: Project,
    kind: TaskKind,
    body: Arc<dyn TaskBody>,
    cancel: CancellationToken,
) {
    let project_id = project.id;
    notifier.publish(task_event(event_types::TASK_STARTED, project_id, kind));

    let result = match tokio::spawn(async move { body.run(&project, cancel).await }).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(TaskError::Panicked(panic_message(e.into_panic()))),
        Err(e) => Err(TaskError::Panicked(e.to_string())),
    };

    match result {
        Ok(()) => {
            if let Some(checkpoints) = kind.checkpoints() {
                match registry
                    .transition_progress(project_id, &[checkpoints.running], checkpoints.done)
                    .await
                {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        tracing::warn!(project_id, kind = %kind, "Checkpoint moved while task ran");
                    }
                    Err(e) => {
                        tracing::error!(project_id, error = %e, "Failed to record task success");
                    }
                }
            }
            tracing::info!(project_id, kind = %kind, "Task finished");
            notifier.publish(task_event(event_types::TASK_FINISHED, project_id, kind));
        }
        Err(err) => {
            tracing::error!(project_id, kind = %kind, error = %err, "Task failed");
            if let Some(checkpoints) = kind.checkpoints() {
                if let Err(e) = registry
                    .rollback_progress(project_id, checkpoints.running)
                    .await
                {
                    tracing::error!(project_id, error = %e, "Failed to roll back checkpoint");
                }
            }
            notifier.publish(
                PlatformEvent::project(event_types::TASK_FAILED, project_id)
                    .with_payload(json!({
                        "task": kind.as_str(),
                        "error": err.to_string(),
                    })),
            );
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown panic".to_string()),
    }
}
