use std::time::Duration;

/// Configuration for the delivery worker's retry backoff and its
/// companion retry scheduler.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Consumer group name for the ROUTES subscription.
    pub consumer_group: String,
    /// Base of the exponential backoff: `base * 2^(attempts-1)`.
    pub base_backoff: Duration,
    /// Ceiling applied to the computed backoff before jitter.
    pub max_backoff: Duration,
    /// A job that has failed this many times moves to FAILED instead of
    /// being rescheduled again.
    pub max_attempts: u32,
    /// How often the retry scheduler polls for jobs whose
    /// `next_attempt_at` has elapsed.
    pub scheduler_interval: Duration,
    /// Jobs republished per scheduler tick.
    pub scheduler_batch_size: u32,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            consumer_group: "pulsegrid-delivery".to_owned(),
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(300),
            max_attempts: 3,
            scheduler_interval: Duration::from_secs(5),
            scheduler_batch_size: 100,
        }
    }
}

impl DeliveryConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            consumer_group: std::env::var("PULSEGRID_DELIVERY_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            max_attempts: std::env::var("PULSEGRID_DELIVERY_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_attempts),
            ..defaults
        }
    }
}

/// `min(max_backoff, base * 2^(attempts-1))` with up to 20% jitter.
/// `attempts` is the job's attempt count *after* the failing attempt that
/// triggered this reschedule.
#[must_use]
pub fn backoff_for_attempt(config: &DeliveryConfig, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(20);
    let scaled = config.base_backoff.saturating_mul(1u32.checked_shl(exponent).unwrap_or(u32::MAX));
    let capped = scaled.min(config.max_backoff);
    let jitter_frac: f64 = rand::random::<f64>() * 0.2;
    capped.mul_f64(1.0 + jitter_frac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_documented_values() {
        let cfg = DeliveryConfig::default();
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.base_backoff, Duration::from_secs(2));
    }

    #[test]
    fn backoff_grows_with_attempts_and_respects_ceiling() {
        let cfg = DeliveryConfig::default();
        let first = backoff_for_attempt(&cfg, 1);
        let second = backoff_for_attempt(&cfg, 2);
        assert!(first >= cfg.base_backoff);
        assert!(second > first.mul_f64(0.9));
        let huge = backoff_for_attempt(&cfg, 100);
        assert!(huge <= cfg.max_backoff.mul_f64(1.2));
    }
}
