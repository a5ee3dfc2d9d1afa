//! Lifecycle events and the in-process bus that fans them out.
//!
//! Every job and task transition becomes a [`PlatformEvent`] on the
//! [`EventBus`]. Subscribers (persistence, webhook relay, tests) each get
//! their own copy; publishing never waits for them.

use alaska_core::types::DbId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Event names published by the worker and the API server.
pub mod event_types {
    // Analysis jobs, sourced from the job.
    pub const JOB_STARTED: &str = "job.started";
    pub const JOB_SUCCEEDED: &str = "job.succeeded";
    pub const JOB_FAILED: &str = "job.failed";
    pub const JOB_INTERRUPTED: &str = "job.interrupted";

    // Supervised tasks, sourced from the project.
    pub const TASK_STARTED: &str = "task.started";
    pub const TASK_FINISHED: &str = "task.finished";
    pub const TASK_FAILED: &str = "task.failed";

    // Reference index builds, sourced from the reference.
    pub const REFERENCE_BUILT: &str = "reference.built";
    pub const REFERENCE_FAILED: &str = "reference.failed";

    pub const PROGRESS_ROLLED_BACK: &str = "project.progress_rolled_back";
}

const SOURCE_JOB: &str = "job";
const SOURCE_PROJECT: &str = "project";
const SOURCE_REFERENCE: &str = "reference";

/// A lifecycle event about one job or project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformEvent {
    /// Dot-separated name from [`event_types`].
    pub event_type: String,
    /// `"job"` or `"project"`.
    pub source_entity_type: Option<String>,
    pub source_entity_id: Option<DbId>,
    /// Event-specific detail; an empty object when there is none.
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl PlatformEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source_entity_type: None,
            source_entity_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// An event sourced from an analysis job.
    pub fn job(event_type: &str, job_id: DbId) -> Self {
        Self::new(event_type).with_source(SOURCE_JOB, job_id)
    }

    /// An event sourced from a project.
    pub fn project(event_type: &str, project_id: DbId) -> Self {
        Self::new(event_type).with_source(SOURCE_PROJECT, project_id)
    }

    /// An event sourced from a genome reference.
    pub fn reference(event_type: &str, reference_id: DbId) -> Self {
        Self::new(event_type).with_source(SOURCE_REFERENCE, reference_id)
    }

    pub fn with_source(mut self, entity_type: impl Into<String>, entity_id: DbId) -> Self {
        self.source_entity_type = Some(entity_type.into());
        self.source_entity_id = Some(entity_id);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Events buffered per subscriber before the slowest one starts lagging.
const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast hub shared as `Arc<EventBus>`.
///
/// Subscribers see a `Closed` error once the last reference is dropped,
/// which is how the background services learn to exit.
pub struct EventBus {
    sender: broadcast::Sender<PlatformEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Hand `event` to every current subscriber and return how many there
    /// were. With none the event is dropped.
    pub fn publish(&self, event: PlatformEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlatformEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
