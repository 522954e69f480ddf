use std::time::Duration;

/// Configuration for the JWKS validator's key cache.
#[derive(Debug, Clone)]
pub struct JwksConfig {
    /// Where to fetch the JWK set from.
    pub jwks_url: String,
    /// Required `iss` claim value.
    pub issuer: String,
    /// Required `aud` claim value, if the deployment checks one.
    pub audience: Option<String>,
    /// How long a fetched key set is considered fresh before a refresh is
    /// attempted.
    pub ttl: Duration,
    /// Hard ceiling: keys older than this are rejected outright even if
    /// the source is unreachable -- a cached key set is served stale on
    /// source failure only up to this cap.
    pub staleness_cap: Duration,
    /// How often the background refresh loop attempts to re-fetch.
    pub refresh_interval: Duration,
    /// Per-request deadline for the JWKS fetch.
    pub fetch_timeout: Duration,
}

impl JwksConfig {
    #[must_use]
    pub fn new(jwks_url: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            issuer: issuer.into(),
            audience: None,
            ttl: Duration::from_secs(600),
            staleness_cap: Duration::from_secs(3600),
            refresh_interval: Duration::from_secs(600),
            fetch_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_documented_values() {
        let config = JwksConfig::new("https://issuer.example/.well-known/jwks.json", "https://issuer.example/");
        assert_eq!(config.ttl, Duration::from_secs(600));
        assert_eq!(config.staleness_cap, Duration::from_secs(3600));
        assert_eq!(config.fetch_timeout, Duration::from_secs(5));
    }
}
