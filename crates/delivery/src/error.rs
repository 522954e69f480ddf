use thiserror::Error;

/// Errors surfaced by the delivery worker and retry scheduler.
///
/// A single job's dispatch failure is never represented here -- spec
/// §4.5 requires classifying it into a [`crate::DispatchOutcome`] and
/// recording an attempt, not aborting the run loop. This enum covers
/// failures that legitimately stop processing of the whole batch: the
/// store or bus is unreachable.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("state error: {0}")]
    State(#[from] pulsegrid_state::StateError),

    #[error("bus error: {0}")]
    Bus(#[from] pulsegrid_bus::BusError),
}
