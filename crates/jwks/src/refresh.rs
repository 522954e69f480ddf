use std::sync::Arc;

use crate::cache::JwksCache;

/// Refreshes `cache` on `cache.config().refresh_interval` until `shutdown`
/// fires. An immediate refresh runs before the first tick so the cache is
/// warm before any request needs it.
pub async fn run_refresh_loop(cache: Arc<JwksCache>, shutdown: tokio_util::sync::CancellationToken) {
    cache.refresh().await;

    let mut ticker = tokio::time::interval(cache.config().refresh_interval);
    ticker.tick().await; // consume the immediate first tick, already refreshed above

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                cache.refresh().await;
            }
            () = shutdown.cancelled() => {
                tracing::info!("jwks refresh loop shutting down");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwksConfig;

    #[tokio::test]
    async fn shutdown_stops_the_loop_promptly() {
        let config = JwksConfig::new("http://127.0.0.1:1/jwks.json", "https://issuer.example/");
        let cache = Arc::new(JwksCache::new(config));
        let shutdown = tokio_util::sync::CancellationToken::new();

        let shutdown_clone = shutdown.clone();
        let handle = tokio::spawn(run_refresh_loop(cache, shutdown_clone));

        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("refresh loop should exit promptly after shutdown")
            .expect("refresh loop task should not panic");
    }
}
