use thiserror::Error;

/// Errors surfaced by a [`crate::RelationalStore`] or [`crate::TimeSeriesStore`]
/// implementation.
///
/// Persistence failures are transient-by-default: callers
/// (the batch writer, the evaluator's tick loop) decide whether to retry,
/// requeue, or quarantine based on this variant, not on backend-specific
/// error types leaking through.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("tenant context not set on this connection")]
    MissingTenantContext,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found")]
    NotFound,

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}
