use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::RejectionReason;
use crate::ids::{DeviceId, TenantId};

/// A rejected ingest event. Quarantine is a sink only -- it is never read
/// back as a feed into the evaluator or any other downstream component.
/// Retention is shorter than telemetry retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineEvent {
    pub time: DateTime<Utc>,
    pub tenant_id: TenantId,
    pub device_id: DeviceId,
    pub topic: String,
    pub reason: RejectionReason,
    pub payload: serde_json::Value,
    pub envelope_version: Option<String>,
}

impl QuarantineEvent {
    #[must_use]
    pub fn new(
        tenant_id: impl Into<TenantId>,
        device_id: impl Into<DeviceId>,
        topic: impl Into<String>,
        reason: RejectionReason,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            time: Utc::now(),
            tenant_id: tenant_id.into(),
            device_id: device_id.into(),
            topic: topic.into(),
            reason,
            payload,
            envelope_version: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_code_is_stable() {
        let event = QuarantineEvent::new(
            "t1",
            "d1",
            "telemetry/t1/d1/telemetry",
            RejectionReason::RateLimited,
            serde_json::json!({}),
        );
        assert_eq!(event.reason.code(), "rate_limited");
    }
}
