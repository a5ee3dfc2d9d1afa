//! The HTTP surface of the API server: `/health` plus the versioned routes,
//! wrapped in the request middleware. `main.rs` and the integration tests
//! both build the app here.

use std::time::Duration;

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::ApiConfig;
use crate::routes;
use crate::state::AppState;

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Browsers may cache a preflight answer for this long.
const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(60 * 60);

pub fn build_app_router(state: AppState, config: &ApiConfig) -> Router {
    let app = Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes());
    with_middleware(app, config).with_state(state)
}

/// Outermost layer last: CORS sees the request first, and a panicking
/// handler still gets a request id and a trace span.
fn with_middleware(app: Router<AppState>, config: &ApiConfig) -> Router<AppState> {
    let deadline = Duration::from_secs(config.request_timeout_secs);
    app.layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, deadline))
        .layer(PropagateRequestIdLayer::new(REQUEST_ID))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(REQUEST_ID, MakeRequestUuid))
        .layer(cors_layer(&config.cors_origins))
}

/// The API is read and triggered from dashboards on `origins`; task
/// endpoints only take `GET` and `POST` with JSON bodies.
fn cors_layer(origins: &[String]) -> CorsLayer {
    // Origins are validated at config load; anything unparsable is dropped.
    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .max_age(PREFLIGHT_MAX_AGE)
}
