//! Route definitions for the `/projects` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::project;
use crate::state::AppState;

/// Routes mounted at `/projects`.
///
/// ```text
/// POST   /{id}/initialize       -> initialize_project
/// POST   /{id}/delete           -> delete_project
/// POST   /{id}/start            -> start_project
/// POST   /{id}/compile          -> start_compile
/// POST   /{id}/upload           -> start_upload
/// POST   /{id}/session          -> open_session
/// POST   /{id}/session/close    -> close_session
/// GET    /{id}/tasks/{kind}     -> task_status
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}/initialize", post(project::initialize_project))
        .route("/{id}/delete", post(project::delete_project))
        .route("/{id}/start", post(project::start_project))
        .route("/{id}/compile", post(project::start_compile))
        .route("/{id}/upload", post(project::start_upload))
        .route("/{id}/session", post(project::open_session))
        .route("/{id}/session/close", post(project::close_session))
        .route("/{id}/tasks/{kind}", get(project::task_status))
}
