/// Configuration for the notification router's consumer loop.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Consumer group name for the ALERTS subscription; one group per
    /// logical router deployment so replicas share the workload.
    pub consumer_group: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { consumer_group: "pulsegrid-router".to_owned() }
    }
}

impl RouterConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            consumer_group: std::env::var("PULSEGRID_ROUTER_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_consumer_group_name() {
        assert_eq!(RouterConfig::default().consumer_group, "pulsegrid-router");
    }
}
