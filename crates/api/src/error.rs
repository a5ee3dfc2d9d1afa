use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use alaska_core::error::CoreError;
use alaska_db::RegistryError;
use alaska_sandbox::SandboxError;
use serde_json::json;

use crate::tasks::TaskError;
use crate::workspace::WorkspaceError;

/// Application-level error type for HTTP handlers.
///
/// Implements [`IntoResponse`] to produce consistent JSON error responses
/// of the form `{"error": ..., "code": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `alaska_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

type Classified = (StatusCode, &'static str, String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core),
            AppError::Registry(err) => classify_registry_error(err),
            AppError::Task(err) => match err {
                TaskError::AlreadyRunning { .. } | TaskError::Conflict(_) => {
                    (StatusCode::CONFLICT, "CONFLICT", err.to_string())
                }
                TaskError::Registry(inner) => classify_registry_error(inner),
                other => internal(other),
            },
            AppError::Sandbox(err) => internal(err),
            AppError::Workspace(err) => match err {
                WorkspaceError::RootExists(_) | WorkspaceError::Busy(_) => {
                    (StatusCode::CONFLICT, "CONFLICT", err.to_string())
                }
                WorkspaceError::Registry(inner) => classify_registry_error(inner),
                WorkspaceError::Io(_) => internal(err),
            },
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => internal(msg),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn internal(err: &dyn std::fmt::Display) -> Classified {
    tracing::error!(error = %err, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

fn classify_core_error(err: &CoreError) -> Classified {
    match err {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
    }
}

fn classify_registry_error(err: &RegistryError) -> Classified {
    match err {
        RegistryError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
        RegistryError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        RegistryError::Database(db) => classify_sqlx_error(db),
        RegistryError::Corrupt(_) => internal(err),
    }
}

/// Classify a sqlx error into an HTTP status, error code, and message.
///
/// - `RowNotFound` maps to 404.
/// - Everything else maps to 500 with a sanitized message.
fn classify_sqlx_error(err: &sqlx::Error) -> Classified {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        other => internal(other),
    }
}
