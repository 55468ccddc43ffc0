//! OpenAPI specification generation for the bletrack API.
//!
//! The document is served at `/api/openapi.json` and written to the
//! workspace root by the `gen-openapi` binary for gateway integrators.

use axum::Json;
use utoipa::OpenApi;

use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::ingest::{
    BatchItemResult, BatchItemStatus, BatchResponse, IngestResponse, IngestStatus,
};
use bletrack_core::SignalQuality;

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for bletrack.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "bletrack API",
        version = "0.1.0",
        description = r#"
# bletrack API

bletrack records sightings of Bluetooth Low Energy devices reported by
scanning gateways (typically routers running a BLE scanner).

## Overview

1. **Ingest**: gateways POST one JSON report per advertisement, or a batch.
2. **Validation**: device address, RSSI (-100..=0 dBm) and timestamp are checked;
   bad reports get a 400 with a machine-readable `error` code.
3. **Deduplication**: repeats of a device within the configured interval are
   acknowledged with `"status": "deduplicated"` and not stored.
4. **Storage**: accepted sightings are appended to a SQLite datastore.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local bletrack server")
    ),
    tags(
        (
            name = "system",
            description = "Health checks and gateway connectivity probe"
        ),
        (
            name = "ingest",
            description = "BLE sighting submission"
        )
    ),
    paths(
        super::health::health_check,
        super::health::live_open,
        super::ingest::ingest_report,
        super::ingest::ingest_batch,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            IngestStatus,
            IngestResponse,
            SignalQuality,
            BatchItemStatus,
            BatchItemResult,
            BatchResponse,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "bletrack API");
        assert!(spec.paths.paths.contains_key("/api/ingest"));
        assert!(spec.paths.paths.contains_key("/api/ingest/batch"));
        assert!(spec.paths.paths.contains_key("/health"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"bletrack API\""));
        assert!(json.contains("ingestReport"));
    }
}
