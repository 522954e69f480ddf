/// Retention settings for the `PostgreSQL`-backed time-series and
/// quarantine tables. Connection and pool sizing live on
/// [`pulsegrid_tenancy::TenancyConfig`], which this crate's store
/// constructors also take.
#[derive(Debug, Clone)]
pub struct PostgresStoreConfig {
    /// Telemetry retention, used by the periodic retention sweep.
    pub telemetry_retention: chrono::Duration,
    /// Quarantine retention; kept shorter than telemetry since rejected
    /// samples are diagnostic, not billable history.
    pub quarantine_retention: chrono::Duration,
}

impl Default for PostgresStoreConfig {
    fn default() -> Self {
        Self {
            telemetry_retention: chrono::Duration::days(90),
            quarantine_retention: chrono::Duration::days(14),
        }
    }
}

impl PostgresStoreConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            telemetry_retention: std::env::var("PULSEGRID_TELEMETRY_RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(chrono::Duration::days)
                .unwrap_or(defaults.telemetry_retention),
            quarantine_retention: std::env::var("PULSEGRID_QUARANTINE_RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(chrono::Duration::days)
                .unwrap_or(defaults.quarantine_retention),
        }
    }
}

/// The AES-256-GCM key used to decrypt `ChannelConfig::Webhook.signing_secret`
/// when it was provisioned as an `ENC[AES256-GCM,...]` envelope, read from
/// `PULSEGRID_CHANNEL_SECRET_KEY` (64 hex chars or base64; see
/// [`pulsegrid_crypto::parse_master_key`]). `Ok(None)` when the variable is
/// unset -- channels with plaintext secrets still work either way.
///
/// # Errors
///
/// Returns an error message if the variable is set but not a valid key.
pub fn channel_secret_master_key_from_env() -> Result<Option<pulsegrid_crypto::MasterKey>, String> {
    std::env::var("PULSEGRID_CHANNEL_SECRET_KEY")
        .ok()
        .map(|raw| {
            pulsegrid_crypto::parse_master_key(&raw)
                .map_err(|e| format!("invalid PULSEGRID_CHANNEL_SECRET_KEY: {e}"))
        })
        .transpose()
}
