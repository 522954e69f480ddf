use thiserror::Error;

/// Errors surfaced by an [`crate::EventBus`] implementation.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("subject {0:?} is not a valid dot-separated subject")]
    InvalidSubject(String),

    #[error("consumer group {0:?} closed")]
    ConsumerClosed(String),
}
