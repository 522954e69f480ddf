use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::{Envelope, EnvelopeVersion, MetricValue};
use crate::ids::{DeviceId, SiteId, TenantId};

/// An accepted, append-only telemetry row. Partitioned by `time` in storage;
/// retention is by age (enforced by the storage backend, not this type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub time: DateTime<Utc>,
    pub tenant_id: TenantId,
    pub device_id: DeviceId,
    pub site_id: Option<SiteId>,
    pub seq: Option<u64>,
    pub metrics: HashMap<String, MetricValue>,
    pub envelope_version: EnvelopeVersion,
}

impl TelemetryRecord {
    /// Build the canonical persisted record from a validated envelope.
    #[must_use]
    pub fn from_envelope(
        tenant_id: TenantId,
        site_id: Option<SiteId>,
        envelope: &Envelope,
    ) -> Self {
        let time = DateTime::from_timestamp(envelope.ts as i64, 0).unwrap_or_else(Utc::now);
        Self {
            time,
            tenant_id,
            device_id: envelope.device_id.clone(),
            site_id,
            seq: envelope.seq,
            metrics: envelope.metrics.clone(),
            envelope_version: envelope.version.clone(),
        }
    }

    #[must_use]
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).and_then(MetricValue::as_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_envelope() {
        let envelope = Envelope::new("dev-1", 1_700_000_000.0)
            .with_metric("temp_c", MetricValue::Number(41.2))
            .with_seq(3);
        let record =
            TelemetryRecord::from_envelope(TenantId::new("t1"), None, &envelope);
        assert_eq!(record.device_id.as_str(), "dev-1");
        assert_eq!(record.seq, Some(3));
        assert_eq!(record.metric("temp_c"), Some(41.2));
        assert_eq!(record.metric("missing"), None);
    }
}
