//! Handlers for reference index builds.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::response::DataResponse;
use crate::state::AppState;
use crate::tasks::BuildStart;

#[derive(Debug, Serialize)]
pub struct BuildStatus {
    pub status: BuildStart,
}

#[derive(Debug, Serialize)]
pub struct BuildRunning {
    pub running: bool,
}

/// POST /api/v1/reference/build
///
/// Build indexes for every unbuilt reference. Returns 202 when a pass
/// starts and 200 with status `running` when one is already under way.
pub async fn start_build(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.references.start().await;
    let code = match status {
        BuildStart::Started => StatusCode::ACCEPTED,
        BuildStart::Running => StatusCode::OK,
    };
    (code, Json(DataResponse { data: BuildStatus { status } }))
}

/// GET /api/v1/reference/build
pub async fn build_status(State(state): State<AppState>) -> impl IntoResponse {
    let running = state.references.is_running().await;
    Json(DataResponse {
        data: BuildRunning { running },
    })
}
