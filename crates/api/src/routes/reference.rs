//! Route definitions for the `/reference` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::reference;
use crate::state::AppState;

/// Routes mounted at `/reference`.
///
/// ```text
/// POST   /build   -> start_build
/// GET    /build   -> build_status
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/build",
        get(reference::build_status).post(reference::start_build),
    )
}
