//! The ingestion pipeline: parse, gate, persist.
//!
//! [`Ingestor`] owns one of each stage and is shared by every request
//! handler. Each report is processed independently; the only cross-request
//! state is the gate's recency map and the storage connection.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::IngestError;
use crate::gate::{Decision, DedupGate};
use crate::parser::{ReportContext, ReportParser};
use crate::record::Sighting;
use crate::storage::Storage;
use crate::tags::TagTable;

/// What happened to an accepted report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Written to the datastore.
    Stored {
        /// Row id of the new sighting.
        id: i64,
        /// The stored record.
        sighting: Sighting,
    },
    /// Suppressed by the dedup gate; nothing written.
    Deduplicated {
        /// The suppressed record.
        sighting: Sighting,
    },
}

impl IngestOutcome {
    /// The record this outcome refers to.
    #[must_use]
    pub const fn sighting(&self) -> &Sighting {
        match self {
            Self::Stored { sighting, .. } | Self::Deduplicated { sighting } => sighting,
        }
    }

    /// Row id when the record was written.
    #[must_use]
    pub const fn sighting_id(&self) -> Option<i64> {
        match self {
            Self::Stored { id, .. } => Some(*id),
            Self::Deduplicated { .. } => None,
        }
    }
}

/// Shared pipeline state.
#[derive(Debug, Clone)]
pub struct Ingestor {
    parser: Arc<ReportParser>,
    gate: Arc<DedupGate>,
    storage: Storage,
}

impl Ingestor {
    /// Assemble a pipeline from its stages.
    #[must_use]
    pub fn new(parser: ReportParser, gate: DedupGate, storage: Storage) -> Self {
        Self {
            parser: Arc::new(parser),
            gate: Arc::new(gate),
            storage,
        }
    }

    /// Build the parser and gate from `settings` around an initialized datastore.
    #[must_use]
    pub fn from_settings(settings: &Settings, tags: TagTable, storage: Storage) -> Self {
        let parser = ReportParser::new(
            tags,
            std::time::Duration::from_secs(settings.max_future_skew_seconds),
            std::time::Duration::from_secs(settings.max_report_age_seconds),
        );
        Self::new(parser, DedupGate::new(settings.dedup_interval()), storage)
    }

    /// The datastore handle.
    #[must_use]
    pub const fn storage(&self) -> &Storage {
        &self.storage
    }

    /// The dedup gate.
    #[must_use]
    pub fn gate(&self) -> &DedupGate {
        &self.gate
    }

    /// Ingest one report given as wire text. The text is kept as the raw payload.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Parse`] for rejected reports and
    /// [`IngestError::Write`] when a kept report could not be stored.
    pub async fn ingest_text(
        &self,
        text: &str,
        ctx: ReportContext,
    ) -> Result<IngestOutcome, IngestError> {
        let sighting = self.parser.parse_text(text, ctx).inspect_err(|e| {
            warn!(gateway = ?ctx.gateway, reason = e.code(), error = %e, "Rejected report");
        })?;
        self.admit(sighting).await
    }

    async fn admit(&self, sighting: Sighting) -> Result<IngestOutcome, IngestError> {
        let previous = match self.gate.admit(&sighting) {
            Decision::Keep { previous } => previous,
            Decision::Drop { last_accepted } => {
                debug!(
                    device_id = %sighting.device_id,
                    observed_at = %sighting.observed_at,
                    last_accepted = %last_accepted,
                    "Sighting deduplicated"
                );
                return Ok(IngestOutcome::Deduplicated { sighting });
            }
        };

        match self.storage.append_blocking(sighting.clone()).await {
            Ok(id) => {
                info!(
                    sighting_id = id,
                    device_id = %sighting.device_id,
                    rssi = sighting.rssi,
                    tag = sighting.tag.as_deref().unwrap_or("-"),
                    gateway = ?sighting.gateway,
                    "Sighting stored"
                );
                Ok(IngestOutcome::Stored { id, sighting })
            }
            Err(err) => {
                self.gate.restore(&sighting.device_id, previous);
                tracing::error!(
                    device_id = %sighting.device_id,
                    observed_at = %sighting.observed_at,
                    error = %err,
                    "Failed to store sighting"
                );
                Err(IngestError::Write(err))
            }
        }
    }
}
