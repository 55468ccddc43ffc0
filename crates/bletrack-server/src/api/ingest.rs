//! Sighting ingestion endpoints.
//!
//! Gateways POST one JSON report per advertisement to `/api/ingest`, or a
//! list of reports to `/api/ingest/batch`. Each report runs through the
//! parse → gate → store pipeline independently.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::routing::post;
use axum::{Json, Router};
use bletrack_core::{IngestError, IngestOutcome, ParseError, ReportContext, SignalQuality};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the ingest router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", post(ingest_report))
        .route("/batch", post(ingest_batch))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// What the pipeline did with an accepted report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// Written to the datastore.
    Stored,
    /// Suppressed as a repeat within the dedup interval.
    Deduplicated,
}

/// Response for an accepted report.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "stored",
    "device_id": "AA:BB:CC:DD:EE:FF",
    "tag": "WHEELCHAIR_A",
    "tag_kind": "equipment",
    "rssi": -45,
    "observed_at": "2024-01-15T10:00:00Z",
    "signal_quality": "excellent",
    "sighting_id": 42
}))]
pub struct IngestResponse {
    /// Whether the sighting was stored or deduplicated.
    pub status: IngestStatus,

    /// Normalized device address.
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub device_id: String,

    /// Tag name from the tag table, if the address is known.
    #[schema(nullable, example = "WHEELCHAIR_A")]
    pub tag: Option<String>,

    /// Kind of the matched tag, when the tag table gives one.
    #[schema(nullable, example = "equipment")]
    pub tag_kind: Option<String>,

    /// Signal strength in dBm.
    #[schema(example = -45)]
    pub rssi: i16,

    /// When the advertisement was observed (UTC).
    pub observed_at: DateTime<Utc>,

    /// Coarse signal strength bucket.
    pub signal_quality: SignalQuality,

    /// Row id of the stored sighting; absent when deduplicated.
    #[schema(nullable, example = 42)]
    pub sighting_id: Option<i64>,
}

impl From<&IngestOutcome> for IngestResponse {
    fn from(outcome: &IngestOutcome) -> Self {
        let sighting = outcome.sighting();
        let status = match outcome {
            IngestOutcome::Stored { .. } => IngestStatus::Stored,
            IngestOutcome::Deduplicated { .. } => IngestStatus::Deduplicated,
        };

        Self {
            status,
            device_id: sighting.device_id.to_string(),
            tag: sighting.tag.clone(),
            tag_kind: sighting.tag_kind.clone(),
            rssi: sighting.rssi,
            observed_at: sighting.observed_at,
            signal_quality: sighting.signal_quality(),
            sighting_id: outcome.sighting_id(),
        }
    }
}

/// Outcome of one item in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BatchItemStatus {
    /// Written to the datastore.
    Stored,
    /// Suppressed by the dedup gate.
    Deduplicated,
    /// Rejected or not written; see `error`.
    Failed,
}

/// Result for one report in a batch.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BatchItemResult {
    /// Position of the report in the request.
    #[schema(example = 0)]
    pub index: usize,

    /// What happened to the report.
    pub status: BatchItemStatus,

    /// Normalized device address, when the report parsed.
    #[schema(nullable, example = "AA:BB:CC:DD:EE:FF")]
    pub device_id: Option<String>,

    /// Row id when stored.
    #[schema(nullable)]
    pub sighting_id: Option<i64>,

    /// Machine-readable error code when failed.
    #[schema(nullable, example = "invalid_rssi")]
    pub error: Option<String>,

    /// Human-readable error message when failed.
    #[schema(nullable)]
    pub message: Option<String>,
}

/// Response for a batch submission.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "total": 2,
    "stored": 1,
    "deduplicated": 0,
    "failed": 1,
    "results": [
        {"index": 0, "status": "stored", "device_id": "AA:BB:CC:DD:EE:FF",
         "sighting_id": 7, "error": null, "message": null},
        {"index": 1, "status": "failed", "device_id": null, "sighting_id": null,
         "error": "missing_field", "message": "Missing required field 'rssi'"}
    ]
}))]
pub struct BatchResponse {
    /// Number of reports received.
    pub total: usize,
    /// Number written to the datastore.
    pub stored: usize,
    /// Number suppressed by the dedup gate.
    pub deduplicated: usize,
    /// Number rejected or not written.
    pub failed: usize,
    /// Per-report results in request order.
    pub results: Vec<BatchItemResult>,
}

impl BatchResponse {
    fn from_results(results: Vec<BatchItemResult>) -> Self {
        let count = |status| results.iter().filter(|r| r.status == status).count();
        Self {
            total: results.len(),
            stored: count(BatchItemStatus::Stored),
            deduplicated: count(BatchItemStatus::Deduplicated),
            failed: count(BatchItemStatus::Failed),
            results,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Ingest a single BLE sighting report.
#[utoipa::path(
    post,
    path = "/api/ingest",
    tag = "ingest",
    operation_id = "ingestReport",
    summary = "Submit one BLE sighting",
    description = "Accepts one JSON report with `device_id` (alias `mac`, `address`), \
        `rssi` in dBm and an optional `observed_at` (alias `timestamp`, `tsUtc`, `ts`). \
        Reports without a timestamp are stamped with the server's receive time. \
        Repeats of a device within the dedup interval are acknowledged but not stored.",
    request_body(
        content = serde_json::Value,
        content_type = "application/json",
        example = json!({
            "device_id": "AA:BB:CC:DD:EE:FF",
            "rssi": -45,
            "observed_at": "2024-01-15T10:00:00Z"
        })
    ),
    responses(
        (status = 200, description = "Report accepted", body = IngestResponse),
        (status = 400, description = "Report rejected", body = super::error::ErrorResponse),
        (status = 500, description = "Report valid but not stored", body = super::error::ErrorResponse),
        (status = 503, description = "Datastore closed", body = super::error::ErrorResponse)
    )
)]
pub async fn ingest_report(
    State(state): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> ApiResult<Json<IngestResponse>> {
    let ctx = ReportContext::now(Some(peer.ip()));
    let text = std::str::from_utf8(&body)
        .map_err(|e| ParseError::UnrecognizedFormat(format!("body is not UTF-8: {e}")))?;

    let outcome = state.ingestor.ingest_text(text, ctx).await?;
    Ok(Json(IngestResponse::from(&outcome)))
}

/// Ingest a list of BLE sighting reports.
#[utoipa::path(
    post,
    path = "/api/ingest/batch",
    tag = "ingest",
    operation_id = "ingestBatch",
    summary = "Submit several BLE sightings",
    description = "Accepts a JSON array of reports, or an object with a `reports` array. \
        Each report is validated, deduplicated and stored independently; one bad \
        report does not fail the others.",
    request_body(
        content = serde_json::Value,
        content_type = "application/json",
        example = json!([
            {"device_id": "AA:BB:CC:DD:EE:FF", "rssi": -45},
            {"mac": "11-22-33-44-55-66", "rssi": -71, "ts": 1_705_312_800}
        ])
    ),
    responses(
        (status = 200, description = "Batch processed", body = BatchResponse),
        (status = 400, description = "Body is not a list of reports", body = super::error::ErrorResponse)
    )
)]
pub async fn ingest_batch(
    State(state): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> ApiResult<Json<BatchResponse>> {
    let reports = batch_items(&body)?;

    let mut results = Vec::with_capacity(reports.len());
    for (index, report) in reports.iter().enumerate() {
        // Each item gets its own receive time.
        let ctx = ReportContext::now(Some(peer.ip()));
        let outcome = state.ingestor.ingest_text(report.get(), ctx).await;
        results.push(item_result(index, outcome));
    }

    let response = BatchResponse::from_results(results);
    info!(
        gateway = %peer.ip(),
        total = response.total,
        stored = response.stored,
        deduplicated = response.deduplicated,
        failed = response.failed,
        "Batch processed"
    );
    Ok(Json(response))
}

// ============================================================================
// Helpers
// ============================================================================

/// Object form of a batch body.
#[derive(Deserialize)]
struct ReportEnvelope {
    reports: Option<Vec<Box<RawValue>>>,
}

/// Extracts the report list from `[...]` or `{"reports": [...]}`.
///
/// Items are kept as raw JSON so each one is stored exactly as sent.
fn batch_items(body: &[u8]) -> Result<Vec<Box<RawValue>>, ApiError> {
    let document: Box<RawValue> = serde_json::from_slice(body)
        .map_err(|e| ParseError::UnrecognizedFormat(format!("invalid JSON: {e}")))?;
    let text = document.get().trim_start();

    let items = match text.as_bytes().first() {
        Some(b'[') => serde_json::from_str::<Vec<Box<RawValue>>>(text).ok(),
        Some(b'{') => serde_json::from_str::<ReportEnvelope>(text)
            .ok()
            .and_then(|envelope| envelope.reports),
        _ => None,
    };

    items.ok_or_else(|| {
        ParseError::UnrecognizedFormat(
            "expected a JSON array or an object with a 'reports' array".to_string(),
        )
        .into()
    })
}

fn item_result(index: usize, outcome: Result<IngestOutcome, IngestError>) -> BatchItemResult {
    match outcome {
        Ok(outcome) => BatchItemResult {
            index,
            status: match outcome {
                IngestOutcome::Stored { .. } => BatchItemStatus::Stored,
                IngestOutcome::Deduplicated { .. } => BatchItemStatus::Deduplicated,
            },
            device_id: Some(outcome.sighting().device_id.to_string()),
            sighting_id: outcome.sighting_id(),
            error: None,
            message: None,
        },
        Err(err) => BatchItemResult {
            index,
            status: BatchItemStatus::Failed,
            device_id: None,
            sighting_id: None,
            error: Some(err.error_code().to_string()),
            message: Some(err.to_string()),
        },
    }
}
