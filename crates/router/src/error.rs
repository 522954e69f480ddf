use thiserror::Error;

/// Errors surfaced by the notification router.
///
/// A malformed routing rule or a single resolution failure is never
/// represented here; those are logged and skipped so one bad rule cannot
/// stop the other rules from matching. This enum covers failures that
/// legitimately stop processing of the whole alert event.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("state error: {0}")]
    State(#[from] pulsegrid_state::StateError),

    #[error("bus error: {0}")]
    Bus(#[from] pulsegrid_bus::BusError),

    #[error("malformed alert event payload: {0}")]
    MalformedEvent(#[from] serde_json::Error),
}
