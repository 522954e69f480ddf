use std::time::Instant;

use dashmap::DashMap;
use pulsegrid_core::{DeviceId, TenantId};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A per-`(tenant_id, device_id)` token bucket rate limiter.
///
/// Backed by a [`DashMap`] so concurrent ingest workers can check distinct
/// devices without contending on a single lock.
pub struct RateLimiter {
    buckets: DashMap<(TenantId, DeviceId), Bucket>,
    tokens_per_sec: f64,
    burst: f64,
}

impl RateLimiter {
    #[must_use]
    pub fn new(tokens_per_sec: f64, burst: f64) -> Self {
        Self { buckets: DashMap::new(), tokens_per_sec, burst }
    }

    /// Attempt to consume one token for `(tenant_id, device_id)`. Returns
    /// `true` if the request is allowed, `false` if it should be rejected
    /// with reason `rate_limited`.
    pub fn try_acquire(&self, tenant_id: &TenantId, device_id: &DeviceId) -> bool {
        let key = (tenant_id.clone(), device_id.clone());
        let mut bucket = self.buckets.entry(key).or_insert_with(|| Bucket {
            tokens: self.burst,
            last_refill: Instant::now(),
        });

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.tokens_per_sec).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_burst_then_refuses() {
        let limiter = RateLimiter::new(5.0, 20.0);
        let tenant = TenantId::new("t1");
        let device = DeviceId::new("d1");

        for _ in 0..20 {
            assert!(limiter.try_acquire(&tenant, &device));
        }
        assert!(!limiter.try_acquire(&tenant, &device));
    }

    #[test]
    fn devices_are_independent() {
        let limiter = RateLimiter::new(5.0, 1.0);
        let tenant = TenantId::new("t1");
        let d1 = DeviceId::new("d1");
        let d2 = DeviceId::new("d2");

        assert!(limiter.try_acquire(&tenant, &d1));
        assert!(!limiter.try_acquire(&tenant, &d1));
        assert!(limiter.try_acquire(&tenant, &d2));
    }
}
