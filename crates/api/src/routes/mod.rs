pub mod health;
pub mod jobs;
pub mod project;
pub mod reference;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /projects/{id}/initialize            create project directories (POST)
/// /projects/{id}/delete                remove project directory (POST)
/// /projects/{id}/start                 queue unfinished analyses (POST)
/// /projects/{id}/compile               start compile task (POST)
/// /projects/{id}/upload                start upload task (POST)
/// /projects/{id}/session               open interactive session (POST)
/// /projects/{id}/session/close         close interactive session (POST)
/// /projects/{id}/tasks/{kind}          task liveness (GET)
///
/// /jobs/{id}                           job record (GET)
/// /jobs/{id}/output                    job log lines (GET)
///
/// /reference/build                     build unbuilt indexes (POST), status (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/projects", project::router())
        .nest("/jobs", jobs::router())
        .nest("/reference", reference::router())
}
