use chrono::{DateTime, Utc};
use pulsegrid_core::DeviceStatus;

use crate::config::EvalConfig;

/// Compute a device's derived status from its last heartbeat: ONLINE
/// within `t_online`, STALE within `t_stale`, else OFFLINE. A device that
/// has never reported is OFFLINE.
#[must_use]
pub fn derive_status(last_seen_at: Option<DateTime<Utc>>, now: DateTime<Utc>, config: &EvalConfig) -> DeviceStatus {
    let Some(last_seen_at) = last_seen_at else {
        return DeviceStatus::Offline;
    };
    let age = now.signed_duration_since(last_seen_at);
    if age <= chrono::Duration::from_std(config.t_online).unwrap_or_default() {
        DeviceStatus::Online
    } else if age <= chrono::Duration::from_std(config.t_stale).unwrap_or_default() {
        DeviceStatus::Stale
    } else {
        DeviceStatus::Offline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_seen_is_offline() {
        let cfg = EvalConfig::default();
        assert_eq!(derive_status(None, Utc::now(), &cfg), DeviceStatus::Offline);
    }

    #[test]
    fn recent_is_online() {
        let cfg = EvalConfig::default();
        let now = Utc::now();
        let status = derive_status(Some(now - chrono::Duration::seconds(30)), now, &cfg);
        assert_eq!(status, DeviceStatus::Online);
    }

    #[test]
    fn between_online_and_stale_is_stale() {
        let cfg = EvalConfig::default();
        let now = Utc::now();
        let status = derive_status(Some(now - chrono::Duration::minutes(5)), now, &cfg);
        assert_eq!(status, DeviceStatus::Stale);
    }

    #[test]
    fn past_stale_window_is_offline() {
        let cfg = EvalConfig::default();
        let now = Utc::now();
        let status = derive_status(Some(now - chrono::Duration::minutes(15)), now, &cfg);
        assert_eq!(status, DeviceStatus::Offline);
    }
}
