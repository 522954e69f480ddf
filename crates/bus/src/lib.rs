pub mod config;
pub mod error;
pub mod memory;
pub mod redis_streams;
pub mod subject;

use async_trait::async_trait;
use bytes::Bytes;

pub use config::BusConfig;
pub use error::BusError;
pub use memory::MemoryEventBus;
pub use redis_streams::RedisStreamsEventBus;

/// The well-known subjects a component publishes or consumes. Wire subject
/// strings are built with [`subject::telemetry`], [`subject::alerts`], and
/// [`subject::routes`].
pub const TELEMETRY_STREAM: &str = "TELEMETRY";
pub const ALERTS_STREAM: &str = "ALERTS";
pub const ROUTES_STREAM: &str = "ROUTES";

/// Delivery semantics requested by a consumer group.
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    /// Redeliver a message this many times before it is dropped (counted
    /// as a final failure by the caller).
    pub max_deliver: u32,
    /// Maximum number of messages the bus will hand to this consumer
    /// group without an ack outstanding.
    pub max_pending: u32,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            max_deliver: 3,
            max_pending: 1000,
        }
    }
}

/// A message handed to a consumer, pending acknowledgement.
///
/// At-least-once: the bus may redeliver a message (up to `max_deliver`
/// times) if the consumer crashes before acking. `ack`/`nack` are taken by
/// value since each delivery is acted on exactly once by the code that
/// received it.
pub struct Delivery {
    pub subject: String,
    pub payload: Bytes,
    pub delivery_count: u32,
    ack: Box<dyn FnOnce(bool) + Send>,
}

impl Delivery {
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        payload: Bytes,
        delivery_count: u32,
        ack: impl FnOnce(bool) + Send + 'static,
    ) -> Self {
        Self {
            subject: subject.into(),
            payload,
            delivery_count,
            ack: Box::new(ack),
        }
    }

    /// Acknowledge successful processing; the message will not be redelivered.
    pub fn ack(self) {
        (self.ack)(true);
    }

    /// Signal failed processing; the message is redelivered up to
    /// `max_deliver` times.
    pub fn nack(self) {
        (self.ack)(false);
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("subject", &self.subject)
            .field("delivery_count", &self.delivery_count)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// A durable consumer bound to one subject pattern and consumer group.
#[async_trait]
pub trait Consumer: Send {
    /// Wait for and return the next delivery, or `None` if the bus has shut
    /// down this consumer.
    async fn next(&mut self) -> Result<Option<Delivery>, BusError>;
}

/// The event bus: at-least-once publish/subscribe with explicit ack.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish one message to `subject`. Best-effort from the caller's
    /// perspective when used by ingest -- publish failures must not block
    /// the caller -- but this trait itself always reports the outcome;
    /// callers that want best-effort semantics catch the error and
    /// continue.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError>;

    /// Create or attach to a durable consumer group over subjects matching
    /// `subject_pattern` (a dot-separated pattern where `*` matches exactly
    /// one segment).
    async fn subscribe(
        &self,
        subject_pattern: &str,
        consumer_group: &str,
        opts: ConsumeOptions,
    ) -> Result<Box<dyn Consumer>, BusError>;

    /// Cheap connectivity check used by `/ready`. In-process backends
    /// answer trivially; networked backends round-trip a no-op command.
    async fn ping(&self) -> Result<(), BusError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_options_default_values() {
        let opts = ConsumeOptions::default();
        assert_eq!(opts.max_deliver, 3);
        assert_eq!(opts.max_pending, 1000);
    }
}
