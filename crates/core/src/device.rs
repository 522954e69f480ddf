use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{DeviceId, SiteId, TenantId, TokenId};

/// Lifecycle status of a device, derived by the evaluator from `last_seen_at`
/// (ONLINE/STALE/OFFLINE) or set directly by provisioning/decommission
/// actions (PROVISIONED/DECOMMISSIONED).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Stale,
    Offline,
    Provisioned,
    Decommissioned,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Online => "online",
            Self::Stale => "stale",
            Self::Offline => "offline",
            Self::Provisioned => "provisioned",
            Self::Decommissioned => "decommissioned",
        };
        write!(f, "{s}")
    }
}

impl FromStr for DeviceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "stale" => Ok(Self::Stale),
            "offline" => Ok(Self::Offline),
            "provisioned" => Ok(Self::Provisioned),
            "decommissioned" => Ok(Self::Decommissioned),
            other => Err(format!("unknown device status: {other}")),
        }
    }
}

/// An optional geo coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// A provisioned device, scoped to one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub tenant_id: TenantId,
    pub device_id: DeviceId,
    pub display_name: String,
    pub device_type: String,
    pub site_id: Option<SiteId>,
    pub geo: Option<GeoPoint>,
    pub status: DeviceStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub template_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Device {
    #[must_use]
    pub fn provision(
        tenant_id: impl Into<TenantId>,
        device_id: impl Into<DeviceId>,
        display_name: impl Into<String>,
        device_type: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            device_id: device_id.into(),
            display_name: display_name.into(),
            device_type: device_type.into(),
            site_id: None,
            geo: None,
            status: DeviceStatus::Provisioned,
            last_seen_at: None,
            template_id: None,
            created_at: Utc::now(),
        }
    }
}

/// A salted-hash credential for device authentication.
///
/// Invariant: the raw secret is returned exactly once, at issuance. This
/// type never stores the raw secret -- only the hash and a client
/// identifier. `revoked_at` is a timestamp, not a delete, preserving the
/// audit trail of which credential authenticated which ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCredential {
    pub tenant_id: TenantId,
    pub device_id: DeviceId,
    pub token_id: TokenId,
    pub client_id: String,
    pub secret_hash: String,
    pub issued_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl DeviceCredential {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_string() {
        for status in [
            DeviceStatus::Online,
            DeviceStatus::Stale,
            DeviceStatus::Offline,
            DeviceStatus::Provisioned,
            DeviceStatus::Decommissioned,
        ] {
            let s = status.to_string();
            let parsed: DeviceStatus = s.parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn unknown_status_string_rejected() {
        assert!("bogus".parse::<DeviceStatus>().is_err());
    }

    #[test]
    fn provisioned_device_has_no_last_seen() {
        let device = Device::provision("t1", "d1", "Thermostat", "thermostat-v2");
        assert_eq!(device.status, DeviceStatus::Provisioned);
        assert!(device.last_seen_at.is_none());
    }

    #[test]
    fn credential_active_without_revocation() {
        let cred = DeviceCredential {
            tenant_id: "t1".into(),
            device_id: "d1".into(),
            token_id: "tok-1".into(),
            client_id: "d1".into(),
            secret_hash: "hash".into(),
            issued_at: Utc::now(),
            revoked_at: None,
        };
        assert!(cred.is_active());
    }
}
