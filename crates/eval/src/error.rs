use thiserror::Error;

/// Errors surfaced by the evaluation engine.
///
/// A per-rule evaluation failure is never represented here -- those are
/// caught at the call site so one bad rule cannot abort the tick. This
/// enum covers failures that legitimately abort a whole tick: the store is
/// unreachable, or publishing a lifecycle event failed.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("state error: {0}")]
    State(#[from] pulsegrid_state::StateError),

    #[error("bus error: {0}")]
    Bus(#[from] pulsegrid_bus::BusError),
}
