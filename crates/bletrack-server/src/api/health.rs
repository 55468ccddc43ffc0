//! Health check API endpoints.
//!
//! `/health` serves monitoring and load balancers; `/api/live-open` is the
//! probe gateways call before forwarding sightings. Both return the same body.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

use crate::state::SharedState;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "ok",
    "version": "0.1.0",
    "server_time": "2024-01-15T10:00:00Z",
    "uptime_seconds": 3600,
    "stored_sightings": 1280,
    "tracked_devices": 14
}))]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the datastore cannot be read.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version from Cargo.toml.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Server clock, for gateways to check their own.
    pub server_time: DateTime<Utc>,

    /// Seconds since the server started.
    #[schema(example = 3600)]
    pub uptime_seconds: u64,

    /// Rows in the datastore; absent when it cannot be read.
    #[schema(nullable, example = 1280)]
    pub stored_sightings: Option<u64>,

    /// Devices with a recent accepted sighting in the dedup gate.
    #[schema(example = 14)]
    pub tracked_devices: usize,
}

/// Creates the health router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(health_check))
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Check service health",
    description = "Returns service status, version and datastore counters. Use this \
        endpoint for load balancer health checks and monitoring.",
    responses(
        (status = 200, description = "Service is running", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    let storage = state.ingestor.storage().clone();
    let stored_sightings = match tokio::task::spawn_blocking(move || storage.count()).await {
        Ok(Ok(count)) => Some(count),
        Ok(Err(e)) => {
            warn!(error = %e, "Health check could not read datastore");
            None
        }
        Err(e) => {
            warn!(error = %e, "Health check task failed");
            None
        }
    };

    Json(HealthResponse {
        status: if stored_sightings.is_some() { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        server_time: Utc::now(),
        uptime_seconds: state.uptime_seconds(),
        stored_sightings,
        tracked_devices: state.ingestor.gate().tracked_devices(),
    })
}

/// Gateway connectivity probe.
#[utoipa::path(
    get,
    path = "/api/live-open",
    tag = "system",
    operation_id = "liveOpen",
    summary = "Gateway connectivity probe",
    description = "Called by gateways to confirm the ingestion endpoint is reachable \
        before they start forwarding sightings. Same body as `/health`.",
    responses(
        (status = 200, description = "Service is running", body = HealthResponse)
    )
)]
pub async fn live_open(state: State<SharedState>) -> Json<HealthResponse> {
    health_check(state).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use bletrack_core::{
        DedupGate, Ingestor, ReportContext, ReportParser, Settings, Storage, TagTable,
    };
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::state::AppState;

    fn test_state() -> (SharedState, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::initialize(dir.path().join("sightings.db")).unwrap();
        let parser = ReportParser::new(
            TagTable::empty(),
            Duration::from_secs(300),
            Duration::from_secs(86_400),
        );
        let ingestor = Ingestor::new(parser, DedupGate::new(Duration::from_secs(10)), storage);
        (AppState::new(ingestor, Settings::default()).shared(), dir)
    }

    async fn get_health(state: SharedState) -> (StatusCode, HealthResponse) {
        let response = router()
            .with_state(state)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_reports_counters() {
        let (state, _dir) = test_state();
        state
            .ingestor
            .ingest_text(
                r#"{"device_id": "AA:BB:CC:DD:EE:FF", "rssi": -50}"#,
                ReportContext::now(None),
            )
            .await
            .unwrap();

        let (status, health) = get_health(state).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(health.status, "ok");
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(health.stored_sightings, Some(1));
        assert_eq!(health.tracked_devices, 1);
    }

    #[tokio::test]
    async fn test_health_degraded_when_datastore_closed() {
        let (state, _dir) = test_state();
        state.ingestor.storage().close();

        let (status, health) = get_health(state).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(health.status, "degraded");
        assert!(health.stored_sightings.is_none());
    }

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
            server_time: Utc::now(),
            uptime_seconds: 0,
            stored_sightings: Some(0),
            tracked_devices: 0,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"stored_sightings\":0"));
    }
}
