use std::time::Duration;

/// Configuration for the evaluation engine's tick scheduler and status
/// thresholds.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// How often the evaluator runs a full tick.
    pub poll_interval: Duration,
    /// A device is ONLINE if seen within this long.
    pub t_online: Duration,
    /// A device is STALE (not yet OFFLINE) if seen within this long.
    pub t_stale: Duration,
    /// How far back to read the rollup window when fetching the latest
    /// metrics snapshot per device.
    pub rollup_lookback: Duration,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            t_online: Duration::from_secs(120),
            t_stale: Duration::from_secs(600),
            rollup_lookback: Duration::from_secs(600),
        }
    }
}

impl EvalConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: std::env::var("PULSEGRID_EVAL_POLL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_documented_values() {
        let cfg = EvalConfig::default();
        assert_eq!(cfg.poll_interval, Duration::from_secs(30));
        assert_eq!(cfg.t_online, Duration::from_secs(120));
        assert_eq!(cfg.t_stale, Duration::from_secs(600));
    }
}
