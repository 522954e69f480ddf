use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::JwkSet;
use tokio::sync::RwLock;

use crate::config::JwksConfig;
use crate::error::JwksError;

struct CachedKeys {
    jwks: JwkSet,
    fetched_at: DateTime<Utc>,
}

/// The JWKS key cache: holds the last successfully fetched key set and
/// when it was fetched, so the validator can serve stale keys across a
/// source outage up to `staleness_cap`.
pub struct JwksCache {
    client: reqwest::Client,
    config: JwksConfig,
    keys: RwLock<Option<CachedKeys>>,
}

impl JwksCache {
    #[must_use]
    pub fn new(config: JwksConfig) -> Self {
        Self { client: reqwest::Client::new(), config, keys: RwLock::new(None) }
    }

    #[must_use]
    pub fn config(&self) -> &JwksConfig {
        &self.config
    }

    async fn fetch(&self) -> Result<JwkSet, JwksError> {
        let response = self
            .client
            .get(&self.config.jwks_url)
            .timeout(self.config.fetch_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(JwksError::SourceStatus(response.status()));
        }
        Ok(response.json::<JwkSet>().await?)
    }

    /// Refresh the cache from the source. Failures are logged and
    /// swallowed here -- the caller keeps serving whatever is already
    /// cached until `staleness_cap` is exceeded; see
    /// [`crate::refresh::run_refresh_loop`].
    pub async fn refresh(&self) {
        match self.fetch().await {
            Ok(jwks) => {
                let mut guard = self.keys.write().await;
                *guard = Some(CachedKeys { jwks, fetched_at: Utc::now() });
            }
            Err(err) => {
                tracing::warn!(error = %err, "jwks refresh failed, serving cached keys until staleness cap");
            }
        }
    }

    /// Look up a decoding key by `kid`. Triggers an eager refresh if the
    /// cache is empty or older than `ttl` (an unrecognized `kid` most
    /// often means the source rotated keys since the last refresh).
    /// Returns `StaleBeyondCap` if no usable key material exists within
    /// the staleness cap.
    pub async fn decoding_key_for(&self, kid: Option<&str>) -> Result<DecodingKey, JwksError> {
        {
            let guard = self.keys.read().await;
            if let Some(cached) = guard.as_ref() {
                let age = Utc::now().signed_duration_since(cached.fetched_at);
                let within_cap = age <= chrono::Duration::from_std(self.config.staleness_cap).unwrap_or_default();
                let fresh = age <= chrono::Duration::from_std(self.config.ttl).unwrap_or_default();
                if within_cap {
                    if let Some(key) = find_key(&cached.jwks, kid) {
                        return Ok(key);
                    }
                    if fresh {
                        return Err(kid_error(kid));
                    }
                    // Stale but within cap and kid not found: fall through
                    // to an eager refresh below, the source may have
                    // rotated.
                } else {
                    return Err(JwksError::StaleBeyondCap);
                }
            }
        }

        self.refresh().await;

        let guard = self.keys.read().await;
        let Some(cached) = guard.as_ref() else {
            return Err(JwksError::StaleBeyondCap);
        };
        let age = Utc::now().signed_duration_since(cached.fetched_at);
        if age > chrono::Duration::from_std(self.config.staleness_cap).unwrap_or_default() {
            return Err(JwksError::StaleBeyondCap);
        }
        find_key(&cached.jwks, kid).ok_or_else(|| kid_error(kid))
    }
}

fn kid_error(kid: Option<&str>) -> JwksError {
    JwksError::UnknownKid(kid.unwrap_or("<none>").to_owned())
}

fn find_key(jwks: &JwkSet, kid: Option<&str>) -> Option<DecodingKey> {
    let jwk = match kid {
        Some(kid) => jwks.find(kid)?,
        None if jwks.keys.len() == 1 => &jwks.keys[0],
        None => return None,
    };
    DecodingKey::from_jwk(jwk).ok()
}

/// Convenience constructor used by the server at startup: build once,
/// share via `Arc`, never lazily.
#[must_use]
pub fn shared(config: JwksConfig) -> Arc<JwksCache> {
    Arc::new(JwksCache::new(config))
}
