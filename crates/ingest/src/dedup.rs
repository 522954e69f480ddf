use std::time::Duration;

use moka::future::Cache;
use pulsegrid_core::{DeviceId, TenantId};

/// Sequence-number dedup for `(tenant_id, device_id, seq)`: a duplicate
/// `seq` seen within `window` is rejected with `duplicate_seq`.
///
/// Backed by `moka` -- the cache itself enforces the window, so there is
/// no manual sweep loop.
pub struct SeqDedup {
    seen: Cache<(TenantId, DeviceId, u64), ()>,
}

impl SeqDedup {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            seen: Cache::builder().time_to_live(window).max_capacity(1_000_000).build(),
        }
    }

    /// Returns `true` if `(tenant_id, device_id, seq)` was already seen
    /// within the window, in which case the caller should reject the
    /// envelope with `duplicate_seq`. Marks the key as seen either way.
    pub async fn check_and_insert(&self, tenant_id: &TenantId, device_id: &DeviceId, seq: u64) -> bool {
        let key = (tenant_id.clone(), device_id.clone(), seq);
        if self.seen.get(&key).await.is_some() {
            return true;
        }
        self.seen.insert(key, ()).await;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_seq_is_not_duplicate() {
        let dedup = SeqDedup::new(Duration::from_secs(120));
        let tenant = TenantId::new("t1");
        let device = DeviceId::new("d1");
        assert!(!dedup.check_and_insert(&tenant, &device, 1).await);
    }

    #[tokio::test]
    async fn repeated_seq_is_duplicate() {
        let dedup = SeqDedup::new(Duration::from_secs(120));
        let tenant = TenantId::new("t1");
        let device = DeviceId::new("d1");
        assert!(!dedup.check_and_insert(&tenant, &device, 1).await);
        assert!(dedup.check_and_insert(&tenant, &device, 1).await);
    }

    #[tokio::test]
    async fn distinct_devices_do_not_collide() {
        let dedup = SeqDedup::new(Duration::from_secs(120));
        let tenant = TenantId::new("t1");
        let d1 = DeviceId::new("d1");
        let d2 = DeviceId::new("d2");
        assert!(!dedup.check_and_insert(&tenant, &d1, 1).await);
        assert!(!dedup.check_and_insert(&tenant, &d2, 1).await);
    }
}
