//! Application state shared across handlers.

use std::sync::Arc;

use bletrack_core::{Ingestor, Settings};
use chrono::{DateTime, Utc};

/// Handle passed to every handler through axum's `State` extractor.
pub type SharedState = Arc<AppState>;

/// Shared application state.
///
/// Everything mutable lives inside the [`Ingestor`] (gate map and datastore
/// connection), so the state itself needs no lock.
#[derive(Debug)]
pub struct AppState {
    /// Parse, gate and persist pipeline.
    pub ingestor: Ingestor,
    /// Settings the process was started with.
    pub settings: Arc<Settings>,
    /// When this process started serving.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(ingestor: Ingestor, settings: Settings) -> Self {
        Self {
            ingestor,
            settings: Arc::new(settings),
            started_at: Utc::now(),
        }
    }

    /// Wrap into the handle used by the router.
    #[must_use]
    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }

    /// Seconds since the server started.
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        u64::try_from((Utc::now() - self.started_at).num_seconds()).unwrap_or(0)
    }
}
