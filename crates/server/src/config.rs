use std::time::Duration;

/// Which of the four background components this process runs. A single
/// binary can run all of them (the default, suitable for a small
/// deployment or local development) or be split across processes that
/// each run one, matching the pipeline's components-may-be-colocated-or-
/// split deployment model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentRole {
    All,
    Ingest,
    Eval,
    Router,
    Delivery,
}

impl ComponentRole {
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "all" => Some(Self::All),
            "ingest" => Some(Self::Ingest),
            "eval" | "evaluator" => Some(Self::Eval),
            "router" => Some(Self::Router),
            "delivery" => Some(Self::Delivery),
            _ => None,
        }
    }

    #[must_use]
    pub fn runs_ingest(self) -> bool {
        matches!(self, Self::All | Self::Ingest)
    }

    #[must_use]
    pub fn runs_eval(self) -> bool {
        matches!(self, Self::All | Self::Eval)
    }

    #[must_use]
    pub fn runs_router(self) -> bool {
        matches!(self, Self::All | Self::Router)
    }

    #[must_use]
    pub fn runs_delivery(self) -> bool {
        matches!(self, Self::All | Self::Delivery)
    }
}

impl Default for ComponentRole {
    fn default() -> Self {
        Self::All
    }
}

/// Which `RelationalStore`/`TimeSeriesStore` pair to construct at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// In-process, non-durable. No external dependency; suitable for
    /// local development and the in-process integration tests.
    Memory,
    Postgres,
}

/// Which `EventBus` implementation to construct at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusBackend {
    Memory,
    Redis,
}

/// Top-level server configuration, loaded entirely from environment
/// variables -- this workspace has no TOML/YAML config layer, unlike some
/// deployments of this lineage that load from a file.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub role: ComponentRole,
    pub bind_host: String,
    pub bind_port: u16,
    pub shutdown_grace: Duration,
    pub storage_backend: StorageBackend,
    pub bus_backend: BusBackend,
    /// JWKS validation is enabled for `/customer/*` and `/operator/*` iff
    /// both a JWKS URL and issuer are configured; a deployment running
    /// only the ingest/eval/router/delivery components with no HTTP
    /// surface besides `/health` typically leaves these unset.
    pub jwks_url: Option<String>,
    pub jwks_issuer: Option<String>,
    pub jwks_audience: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            role: ComponentRole::All,
            bind_host: "0.0.0.0".to_owned(),
            bind_port: 8080,
            shutdown_grace: Duration::from_secs(10),
            storage_backend: StorageBackend::Memory,
            bus_backend: BusBackend::Memory,
            jwks_url: None,
            jwks_issuer: None,
            jwks_audience: None,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let role = std::env::var("PULSEGRID_ROLE")
            .ok()
            .and_then(|v| ComponentRole::from_str_loose(&v))
            .unwrap_or(defaults.role);
        let storage_backend = match std::env::var("PULSEGRID_STORAGE_BACKEND").ok().as_deref() {
            Some("postgres") => StorageBackend::Postgres,
            Some("memory") => StorageBackend::Memory,
            _ => defaults.storage_backend,
        };
        let bus_backend = match std::env::var("PULSEGRID_BUS_BACKEND").ok().as_deref() {
            Some("redis") => BusBackend::Redis,
            Some("memory") => BusBackend::Memory,
            _ => defaults.bus_backend,
        };

        Self {
            role,
            bind_host: std::env::var("PULSEGRID_BIND_HOST").unwrap_or(defaults.bind_host),
            bind_port: std::env::var("PULSEGRID_BIND_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind_port),
            shutdown_grace: std::env::var("PULSEGRID_SHUTDOWN_GRACE_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_grace),
            storage_backend,
            bus_backend,
            jwks_url: std::env::var("PULSEGRID_JWKS_URL").ok(),
            jwks_issuer: std::env::var("PULSEGRID_JWKS_ISSUER").ok(),
            jwks_audience: std::env::var("PULSEGRID_JWKS_AUDIENCE").ok(),
        }
    }
}

/// SMTP relay settings for the delivery worker's email channel, present
/// only if the deployment configures one -- email is one of several
/// channel types, not mandatory.
#[must_use]
pub fn smtp_settings_from_env() -> Option<pulsegrid_provider_email::SmtpConfig> {
    let host = std::env::var("PULSEGRID_SMTP_HOST").ok()?;
    Some(pulsegrid_provider_email::SmtpConfig {
        host,
        port: std::env::var("PULSEGRID_SMTP_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(587),
        username: std::env::var("PULSEGRID_SMTP_USERNAME").unwrap_or_default(),
        password: std::env::var("PULSEGRID_SMTP_PASSWORD").unwrap_or_default(),
        from_address: std::env::var("PULSEGRID_SMTP_FROM_ADDRESS")
            .unwrap_or_else(|_| "alerts@pulsegrid.example".to_owned()),
    })
}

/// Broker settings for the delivery worker's MQTT publisher, present only
/// if configured.
#[must_use]
pub fn mqtt_publisher_settings_from_env() -> Option<pulsegrid_provider_mqtt::MqttConfig> {
    let host = std::env::var("PULSEGRID_MQTT_HOST").ok()?;
    let defaults = pulsegrid_provider_mqtt::MqttConfig::default();
    Some(pulsegrid_provider_mqtt::MqttConfig {
        host,
        port: std::env::var("PULSEGRID_MQTT_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(defaults.port),
        client_id: std::env::var("PULSEGRID_MQTT_CLIENT_ID").unwrap_or(defaults.client_id),
        username: std::env::var("PULSEGRID_MQTT_USERNAME").ok(),
        password: std::env::var("PULSEGRID_MQTT_PASSWORD").ok(),
        keep_alive: defaults.keep_alive,
    })
}

/// Broker settings for the MQTT ingest subscriber, present only if
/// configured. Shares the same broker as the publisher in a typical
/// deployment but is read independently since the two roles may run in
/// separate processes.
#[must_use]
pub fn mqtt_ingest_settings_from_env() -> Option<pulsegrid_ingest::MqttIngestConfig> {
    let host = std::env::var("PULSEGRID_MQTT_HOST").ok()?;
    let defaults = pulsegrid_ingest::MqttIngestConfig::default();
    Some(pulsegrid_ingest::MqttIngestConfig {
        host,
        port: std::env::var("PULSEGRID_MQTT_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(defaults.port),
        client_id: std::env::var("PULSEGRID_MQTT_INGEST_CLIENT_ID").unwrap_or(defaults.client_id),
        username: std::env::var("PULSEGRID_MQTT_USERNAME").ok(),
        password: std::env::var("PULSEGRID_MQTT_PASSWORD").ok(),
        keep_alive: defaults.keep_alive,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_defaults_to_all() {
        assert_eq!(ServerConfig::default().role, ComponentRole::All);
    }

    #[test]
    fn role_parses_case_insensitively() {
        assert_eq!(ComponentRole::from_str_loose("Delivery"), Some(ComponentRole::Delivery));
        assert_eq!(ComponentRole::from_str_loose("bogus"), None);
    }

    #[test]
    fn all_role_runs_every_component() {
        let role = ComponentRole::All;
        assert!(role.runs_ingest() && role.runs_eval() && role.runs_router() && role.runs_delivery());
    }

    #[test]
    fn single_role_runs_only_itself() {
        let role = ComponentRole::Router;
        assert!(role.runs_router());
        assert!(!role.runs_ingest() && !role.runs_eval() && !role.runs_delivery());
    }
}
