//! HTTP API routes and handlers.
//!
//! - `health` - Service health checks and the gateway probe
//! - `ingest` - Sighting submission
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod error;
pub mod health;
pub mod ingest;
pub mod openapi;

// Re-export commonly used types
pub use error::{ApiError, ApiResult, ErrorResponse};

// Re-export OpenAPI utilities for the gen-openapi binary
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /api
/// ├── /live-open         - Gateway connectivity probe
/// ├── /ingest            - Submit one sighting (POST)
/// ├── /ingest/batch      - Submit several sightings (POST)
/// └── /openapi.json      - OpenAPI specification
/// ```
///
/// Requests taking longer than `request_timeout` are answered with
/// 408 Request Timeout; `None` disables the limit.
pub fn create_router(state: SharedState, request_timeout: Option<Duration>) -> Router {
    let router = Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/live-open", get(health::live_open))
                .nest("/ingest", ingest::router())
                .route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .with_state(state);

    let router = match request_timeout {
        Some(timeout) => router.layer(TimeoutLayer::new(timeout)),
        None => router,
    };

    router.layer(TraceLayer::new_for_http())
}
