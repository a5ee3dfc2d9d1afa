use std::sync::Arc;

use alaska_db::WorkRegistry;
use alaska_sandbox::{Sandbox, SandboxSettings};

use crate::config::ApiConfig;
use crate::tasks::{ReferenceBuilder, TaskSupervisor};

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn WorkRegistry>,
    pub sandbox: Arc<dyn Sandbox>,
    pub supervisor: Arc<TaskSupervisor>,
    pub references: Arc<ReferenceBuilder>,
    pub config: Arc<ApiConfig>,
    /// Launch settings for task sandboxes.
    pub settings: Arc<SandboxSettings>,
}
