//! Per-device rate gate.
//!
//! Scanners rebroadcast every advertisement several times a second. The gate
//! keeps a sighting only when no sighting of the same device was accepted
//! within the configured interval of its `observed_at`. State lives in memory
//! only and starts empty on every process start.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::record::{DeviceId, Sighting};

/// Outcome of [`DedupGate::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Persist the sighting.
    Keep {
        /// Last accepted time before this decision, for [`DedupGate::restore`].
        previous: Option<DateTime<Utc>>,
    },
    /// Skip the write; a sighting of this device was accepted too recently.
    Drop {
        /// The accepted sighting this one collides with.
        last_accepted: DateTime<Utc>,
    },
}

impl Decision {
    /// Whether the sighting should be written.
    #[must_use]
    pub const fn is_keep(&self) -> bool {
        matches!(self, Self::Keep { .. })
    }
}

/// Interval-based duplicate suppression keyed by device.
#[derive(Debug)]
pub struct DedupGate {
    interval: chrono::Duration,
    last_accepted: Mutex<HashMap<DeviceId, DateTime<Utc>>>,
}

impl DedupGate {
    /// Create a gate. A zero interval keeps everything.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::MAX),
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether `sighting` is stored, recording it when kept.
    ///
    /// The check and the update happen under one lock, so two concurrent
    /// reports for the same device cannot both be kept.
    pub fn admit(&self, sighting: &Sighting) -> Decision {
        let mut seen = self.lock();
        let observed_at = sighting.observed_at;

        let previous = seen.get(&sighting.device_id).copied();
        if let Some(last) = previous {
            let distance = (observed_at - last).abs();
            if distance < self.interval {
                return Decision::Drop {
                    last_accepted: last,
                };
            }
        }

        let latest = previous.map_or(observed_at, |last| last.max(observed_at));
        seen.insert(sighting.device_id.clone(), latest);
        Decision::Keep { previous }
    }

    /// Undo a `Keep` whose write failed, so the next sighting is not suppressed.
    pub fn restore(&self, device_id: &DeviceId, previous: Option<DateTime<Utc>>) {
        let mut seen = self.lock();
        match previous {
            Some(last) => {
                seen.insert(device_id.clone(), last);
            }
            None => {
                seen.remove(device_id);
            }
        }
    }

    /// Number of devices with an accepted sighting since startup.
    #[must_use]
    pub fn tracked_devices(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DeviceId, DateTime<Utc>>> {
        // The map is always left consistent, so a poisoned lock is still usable.
        self.last_accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
