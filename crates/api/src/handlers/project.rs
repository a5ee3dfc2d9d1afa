//! Handlers for the `/projects` resource: working directories, pipeline
//! start, supervised tasks and interactive sessions.

use std::sync::Arc;

use alaska_core::analysis::sandbox_name;
use alaska_core::types::DbId;
use alaska_db::models::job::Job;
use alaska_sandbox::{stop_and_remove, SandboxHandle};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::enqueue;
use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;
use crate::tasks::bodies::{CompileBody, SessionBody, UploadBody, SESSION_PREFIX};
use crate::tasks::{TaskBody, TaskKind};
use crate::workspace;

/// Body of an accepted task start.
#[derive(Debug, Serialize)]
pub struct TaskStarted {
    pub project_id: DbId,
    pub task: TaskKind,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ProjectQueued {
    pub project_id: DbId,
    /// Jobs put on the queue, in run order. Empty when every step already
    /// succeeded.
    pub jobs: Vec<Job>,
}

#[derive(Debug, Serialize)]
pub struct ProjectDeleted {
    pub project_id: DbId,
    /// Directory that was removed, if the project had one on disk.
    pub removed: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TaskStatus {
    pub running: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionClosed {
    pub project_id: DbId,
    pub sandbox: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UploadRequest {
    /// Submitter account the archive is filed under.
    #[validate(length(min = 1, max = 64))]
    pub geo_username: String,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn start_task(
    state: &AppState,
    project_id: DbId,
    kind: TaskKind,
    body: Arc<dyn TaskBody>,
) -> AppResult<impl IntoResponse> {
    state.supervisor.start(project_id, kind, body).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: TaskStarted {
                project_id,
                task: kind,
                status: "started",
            },
        }),
    ))
}

// ---------------------------------------------------------------------------
// Working directories
// ---------------------------------------------------------------------------

/// POST /api/v1/projects/{id}/initialize
///
/// Create the project's root and read directories. Returns 409 if the root
/// directory already exists.
pub async fn initialize_project(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let project =
        workspace::initialize_project(state.registry.as_ref(), id, &state.config.project_root)
            .await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: project })))
}

/// POST /api/v1/projects/{id}/delete
///
/// Remove the project's root directory. Returns 409 while the project is
/// at a transient checkpoint.
pub async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let removed =
        workspace::delete_project(state.registry.as_ref(), id, &state.config.project_root)
            .await?;
    Ok(Json(DataResponse {
        data: ProjectDeleted {
            project_id: id,
            removed: removed.map(|path| path.to_string_lossy().into_owned()),
        },
    }))
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// POST /api/v1/projects/{id}/start
///
/// Queue every analysis step that has not yet succeeded. Returns 409 while
/// the project is at a transient checkpoint.
pub async fn start_project(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let jobs =
        enqueue::start_project(state.registry.as_ref(), id, &state.config.project_root).await?;
    Ok(Json(DataResponse {
        data: ProjectQueued {
            project_id: id,
            jobs,
        },
    }))
}

// ---------------------------------------------------------------------------
// Supervised tasks
// ---------------------------------------------------------------------------

/// POST /api/v1/projects/{id}/compile
///
/// Start building the submission archive. Returns 202 once the project is
/// at `compiling`.
pub async fn start_compile(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let body = CompileBody::new(
        Arc::clone(&state.sandbox),
        state.settings.as_ref().clone(),
        &state.config.tasks,
    );
    start_task(&state, id, TaskKind::Compile, Arc::new(body)).await
}

/// POST /api/v1/projects/{id}/upload
///
/// Start sending the compiled archive to GEO under `geo_username`.
pub async fn start_upload(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(input): Json<UploadRequest>,
) -> AppResult<impl IntoResponse> {
    input
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let ftp = state
        .config
        .tasks
        .geo_ftp
        .clone()
        .ok_or_else(|| AppError::BadRequest("Uploads are not configured".to_string()))?;

    let body = UploadBody::new(
        Arc::clone(&state.sandbox),
        state.settings.as_ref().clone(),
        &state.config.tasks,
        ftp,
        input.geo_username,
    );
    start_task(&state, id, TaskKind::Upload, Arc::new(body)).await
}

/// GET /api/v1/projects/{id}/tasks/{kind}
pub async fn task_status(
    State(state): State<AppState>,
    Path((id, kind)): Path<(DbId, String)>,
) -> AppResult<impl IntoResponse> {
    let kind: TaskKind = kind.parse()?;
    let running = state.supervisor.is_running(id, kind).await;
    Ok(Json(DataResponse {
        data: TaskStatus { running },
    }))
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// POST /api/v1/projects/{id}/session
///
/// Open an interactive results session for the project.
pub async fn open_session(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let body = SessionBody::new(
        Arc::clone(&state.sandbox),
        state.settings.as_ref().clone(),
        &state.config.tasks,
    );
    start_task(&state, id, TaskKind::Session, Arc::new(body)).await
}

/// POST /api/v1/projects/{id}/session/close
///
/// Stop and remove the session sandbox. Closing a session that is not open
/// succeeds.
pub async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    state.registry.get_project(id).await?;

    let handle = SandboxHandle::new(sandbox_name(SESSION_PREFIX, id));
    stop_and_remove(state.sandbox.as_ref(), &handle).await?;
    tracing::info!(project_id = id, sandbox = %handle.name, "Session closed");

    Ok(Json(DataResponse {
        data: SessionClosed {
            project_id: id,
            sandbox: handle.name,
        },
    }))
}
