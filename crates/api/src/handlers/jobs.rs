//! Handlers for the `/jobs` resource.

use std::io::ErrorKind;

use alaska_core::error::CoreError;
use alaska_core::types::DbId;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct JobOutput {
    pub job_id: DbId,
    pub lines: Vec<String>,
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.registry.get_job(id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// GET /api/v1/jobs/{id}/output
///
/// Lines of the job's durable log. 404 until the job has run, or if the
/// log has since been removed.
pub async fn get_job_output(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.registry.get_job(id).await?;
    let not_found = || {
        AppError::Core(CoreError::NotFound {
            entity: "Job output",
            id,
        })
    };
    let path = job.output_path.ok_or_else(not_found)?;

    let text = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
        Err(e) => {
            return Err(AppError::InternalError(format!(
                "failed to read job log {path}: {e}"
            )))
        }
    };

    Ok(Json(DataResponse {
        data: JobOutput {
            job_id: id,
            lines: text.lines().map(str::to_string).collect(),
        },
    }))
}
