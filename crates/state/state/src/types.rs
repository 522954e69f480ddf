use std::collections::HashMap;

use chrono::{DateTime, Utc};
use pulsegrid_core::{DeviceId, SiteId};

/// The latest known metrics and heartbeat time for one device, as read by
/// the evaluator's per-tick rollup fetch.
#[derive(Debug, Clone)]
pub struct DeviceRollup {
    pub device_id: DeviceId,
    pub site_id: Option<SiteId>,
    pub metrics: HashMap<String, f64>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Sample counts for a windowed threshold rule (`duration_seconds > 0`).
///
/// `total` is the number of samples of `metric_name` within the window;
/// `breaching` is how many of those satisfy the rule's predicate. The
/// rule fires only when `total > 0` and every sample breaches
/// (`breaching == total`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowSampleCounts {
    pub total: u64,
    pub breaching: u64,
}

impl WindowSampleCounts {
    #[must_use]
    pub fn all_breaching(self) -> bool {
        self.total > 0 && self.breaching == self.total
    }
}

/// Outcome of the atomic open-or-update alert primitive.
#[derive(Debug, Clone)]
pub enum OpenOrUpdateOutcome {
    /// No live alert existed for the fingerprint; one was opened. The
    /// evaluator emits an OPENED lifecycle event exactly once for this case.
    Opened(pulsegrid_core::Alert),
    /// A live alert already existed; its mutable fields were refreshed. No
    /// lifecycle event is emitted.
    Updated(pulsegrid_core::Alert),
}

impl OpenOrUpdateOutcome {
    #[must_use]
    pub fn alert(&self) -> &pulsegrid_core::Alert {
        match self {
            Self::Opened(a) | Self::Updated(a) => a,
        }
    }

    #[must_use]
    pub fn was_opened(&self) -> bool {
        matches!(self, Self::Opened(_))
    }
}

/// Outcome of the atomic close primitive.
#[derive(Debug, Clone)]
pub enum CloseOutcome {
    /// A live alert existed and was closed; a CLOSED event should be emitted.
    Closed(pulsegrid_core::Alert),
    /// No live alert existed for the fingerprint; this is a no-op.
    NoOp,
}

/// Outcome of claiming a job for processing via compare-and-set on status.
#[derive(Debug, Clone)]
pub enum JobClaimOutcome {
    /// The job was PENDING and is now PROCESSING, owned by this caller.
    Claimed(pulsegrid_core::NotificationJob),
    /// The job was already PROCESSING (another worker holds it) or has
    /// since moved to a terminal state; the caller must skip it.
    NotClaimable,
    NotFound,
}

/// Outcome of the idempotent job-insert primitive.
#[derive(Debug, Clone)]
pub enum JobInsertOutcome {
    /// No job existed for this `(alert_id, channel_id, deliver_on_event)`
    /// key; one was created.
    Inserted(pulsegrid_core::NotificationJob),
    /// A job already existed for that key; the router does nothing.
    AlreadyExists,
}
