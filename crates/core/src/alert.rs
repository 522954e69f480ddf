use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::confidence::Confidence;
use crate::ids::{AlertId, DeviceId, SiteId, TenantId};

/// The kind of condition that generated an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Threshold,
    NoHeartbeat,
    NoTelemetry,
    Anomaly,
}

/// Lifecycle status of an [`Alert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Closed,
}

impl AlertStatus {
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Open | Self::Acknowledged)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Acknowledged => "acknowledged",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "acknowledged" => Ok(Self::Acknowledged),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown alert status: {other}")),
        }
    }
}

/// Structured alert detail, free-form per alert type but always carrying
/// enough to reconstruct the summary for notification rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertDetails {
    pub rule_id: Option<String>,
    pub metric_name: Option<String>,
    pub observed_value: Option<f64>,
    pub operator: Option<String>,
    pub threshold: Option<f64>,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A device or rule condition, open/acknowledged/closed over time.
///
/// Invariant: at most one row with status `Open` or `Acknowledged` exists
/// per `(tenant_id, fingerprint)`; enforced by the storage layer's atomic
/// `open_or_update`/`close` primitives, not by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub tenant_id: TenantId,
    pub alert_id: AlertId,
    pub device_id: DeviceId,
    pub site_id: Option<SiteId>,
    pub alert_type: AlertType,
    pub fingerprint: String,
    pub status: AlertStatus,
    pub severity: u8,
    pub confidence: Confidence,
    pub summary: String,
    pub details: AlertDetails,
    pub escalation_level: u32,
    pub next_escalation_at: Option<DateTime<Utc>>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// The fields an evaluator supplies when opening or refreshing an alert.
/// Used by the storage layer's `open_or_update` primitive.
#[derive(Debug, Clone)]
pub struct AlertUpsert {
    pub device_id: DeviceId,
    pub site_id: Option<SiteId>,
    pub alert_type: AlertType,
    pub severity: u8,
    pub confidence: Confidence,
    pub summary: String,
    pub details: AlertDetails,
}

/// Lifecycle events emitted by the evaluator on the ALERTS subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLifecycleEvent {
    Opened,
    Acknowledged,
    Closed,
    Escalated,
}

/// A lifecycle message published to `alerts.<tenant>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub tenant_id: TenantId,
    pub alert_id: AlertId,
    pub device_id: DeviceId,
    pub site_id: Option<SiteId>,
    pub alert_type: AlertType,
    pub severity: u8,
    pub event: AlertLifecycleEvent,
    pub at: DateTime<Utc>,
}

/// Fingerprint for the per-device heartbeat alert.
#[must_use]
pub fn heartbeat_fingerprint(device_id: &DeviceId) -> String {
    format!("HEARTBEAT:{device_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_statuses() {
        assert!(AlertStatus::Open.is_live());
        assert!(AlertStatus::Acknowledged.is_live());
        assert!(!AlertStatus::Closed.is_live());
    }

    #[test]
    fn status_roundtrips() {
        for status in [
            AlertStatus::Open,
            AlertStatus::Acknowledged,
            AlertStatus::Closed,
        ] {
            assert_eq!(status.to_string().parse::<AlertStatus>().unwrap(), status);
        }
    }

    #[test]
    fn heartbeat_fingerprint_format() {
        assert_eq!(
            heartbeat_fingerprint(&DeviceId::new("d1")),
            "HEARTBEAT:d1"
        );
    }
}
