use std::time::Duration;

/// Per-stream retention: `TELEMETRY` (age 1h, 1GB), `ALERTS` (similar),
/// `ROUTES` (age 24h, 512MB).
#[derive(Debug, Clone, Copy)]
pub struct StreamRetention {
    pub max_age: Duration,
    pub max_bytes: u64,
}

/// Configuration for connecting to the event bus backend.
///
/// Loaded from environment variables by [`BusConfig::from_env`]; every
/// field has a documented default.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Redis connection URL (`redis://` or `rediss://`), used by
    /// [`crate::RedisStreamsEventBus`]. Ignored by the in-memory backend.
    pub redis_url: String,
    pub telemetry_retention: StreamRetention,
    pub alerts_retention: StreamRetention,
    pub routes_retention: StreamRetention,
    /// The ingest consumer group name (`ingest-workers`).
    pub ingest_consumer_group: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_owned(),
            telemetry_retention: StreamRetention {
                max_age: Duration::from_secs(3600),
                max_bytes: 1_000_000_000,
            },
            alerts_retention: StreamRetention {
                max_age: Duration::from_secs(3600),
                max_bytes: 1_000_000_000,
            },
            routes_retention: StreamRetention {
                max_age: Duration::from_secs(86_400),
                max_bytes: 512_000_000,
            },
            ingest_consumer_group: "ingest-workers".to_owned(),
        }
    }
}

impl BusConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("PULSEGRID_BUS_URL").unwrap_or(defaults.redis_url),
            ingest_consumer_group: std::env::var("PULSEGRID_INGEST_CONSUMER_GROUP")
                .unwrap_or(defaults.ingest_consumer_group),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_retention() {
        let cfg = BusConfig::default();
        assert_eq!(cfg.telemetry_retention.max_age, Duration::from_secs(3600));
        assert_eq!(cfg.routes_retention.max_age, Duration::from_secs(86_400));
        assert_eq!(cfg.ingest_consumer_group, "ingest-workers");
    }
}
