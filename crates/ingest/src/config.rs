use std::time::Duration;

/// Configuration for the ingestion pipeline: rate limiting, dedup,
/// clock-skew tolerance, and batch-write thresholds.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Token bucket refill rate per `(tenant_id, device_id)`, in tokens/sec.
    pub rate_limit_tokens_per_sec: f64,
    /// Token bucket burst capacity.
    pub rate_limit_burst: f64,
    /// Envelope `ts` must be within this many seconds of server clock.
    pub max_clock_skew: Duration,
    /// Sequence-dedup window: duplicate `(device_id, seq)` within this TTL
    /// is rejected with `duplicate_seq`.
    pub dedup_window: Duration,
    /// Flush a tenant's batch once it holds this many accepted records.
    pub batch_max_records: usize,
    /// Flush a tenant's batch once its oldest record is this old.
    pub batch_max_age: Duration,
    /// Maximum accepted payload size, both transports.
    pub max_payload_bytes: usize,
    /// Capped retry attempts for a failed batch flush before quarantining
    /// the batch with reason `persistence_failed`.
    pub max_flush_attempts: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            rate_limit_tokens_per_sec: 5.0,
            rate_limit_burst: 20.0,
            max_clock_skew: Duration::from_secs(180),
            dedup_window: Duration::from_secs(120),
            batch_max_records: 500,
            batch_max_age: Duration::from_millis(1000),
            max_payload_bytes: 64 * 1024,
            max_flush_attempts: 3,
        }
    }
}

impl IngestConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_payload_bytes: std::env::var("PULSEGRID_INGEST_MAX_PAYLOAD_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_payload_bytes),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_documented_values() {
        let cfg = IngestConfig::default();
        assert_eq!(cfg.rate_limit_tokens_per_sec, 5.0);
        assert_eq!(cfg.rate_limit_burst, 20.0);
        assert_eq!(cfg.max_clock_skew, Duration::from_secs(180));
        assert_eq!(cfg.dedup_window, Duration::from_secs(120));
        assert_eq!(cfg.max_payload_bytes, 64 * 1024);
    }
}
