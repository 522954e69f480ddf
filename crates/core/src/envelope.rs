use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::DeviceId;

/// The telemetry envelope version. Version `"1"` is the only supported
/// version today; forward-compatibility is modeled by the `Unsupported`
/// variant, which carries the offending value so the reject reason
/// `unsupported_envelope_version:<v>` can include it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnvelopeVersion {
    V1,
    Unsupported(String),
}

impl EnvelopeVersion {
    #[must_use]
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::V1)
    }
}

impl Default for EnvelopeVersion {
    fn default() -> Self {
        Self::V1
    }
}

impl From<String> for EnvelopeVersion {
    fn from(value: String) -> Self {
        if value == "1" {
            Self::V1
        } else {
            Self::Unsupported(value)
        }
    }
}

impl From<EnvelopeVersion> for String {
    fn from(value: EnvelopeVersion) -> Self {
        match value {
            EnvelopeVersion::V1 => "1".to_owned(),
            EnvelopeVersion::Unsupported(v) => v,
        }
    }
}

impl fmt::Display for EnvelopeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => write!(f, "1"),
            Self::Unsupported(v) => write!(f, "{v}"),
        }
    }
}

/// The kind of message carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Telemetry,
    Heartbeat,
    Shadow,
    CommandResult,
}

impl Default for MessageType {
    fn default() -> Self {
        Self::Telemetry
    }
}

/// A single numeric-or-boolean metric value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Bool(bool),
}

impl MetricValue {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        }
    }
}

/// The self-describing telemetry message, as received from a device before
/// it is persisted as a [`crate::telemetry::TelemetryRecord`].
///
/// Required fields: `ts`, `device_id` (tenant is derived from the
/// authenticated credential or MQTT topic, not carried in the envelope
/// itself -- see [`crate::ingest_context::AuthenticatedDevice`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Seconds since epoch, as sent by the device.
    pub ts: f64,
    pub device_id: DeviceId,
    #[serde(default)]
    pub version: EnvelopeVersion,
    /// Monotonic per-device sequence number, used for dedup.
    #[serde(default)]
    pub seq: Option<u64>,
    #[serde(default)]
    pub metrics: HashMap<String, MetricValue>,
    #[serde(default)]
    pub msg_type: MessageType,
}

impl Envelope {
    #[must_use]
    pub fn new(device_id: impl Into<DeviceId>, ts: f64) -> Self {
        Self {
            ts,
            device_id: device_id.into(),
            version: EnvelopeVersion::default(),
            seq: None,
            metrics: HashMap::new(),
            msg_type: MessageType::default(),
        }
    }

    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>, value: MetricValue) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }
}

/// Stable, machine-readable rejection reasons for ingest validation failures.
///
/// Open-ended in practice, but modeled as a closed enum plus a catch-all
/// so unknown future reasons still
/// serialize to a reason code rather than panicking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    SchemaInvalid { detail: String },
    ClockSkew { skew_seconds: f64 },
    UnknownDevice,
    BadCredentials,
    DuplicateSeq { seq: u64 },
    UnsupportedEnvelopeVersion { version: String },
    RateLimited,
    PayloadTooLarge { bytes: usize, max_bytes: usize },
    PersistenceFailed { detail: String },
}

impl RejectionReason {
    /// The stable machine-readable code, e.g. `unsupported_envelope_version:2`.
    #[must_use]
    pub fn code(&self) -> String {
        match self {
            Self::SchemaInvalid { .. } => "schema_invalid".to_owned(),
            Self::ClockSkew { .. } => "clock_skew".to_owned(),
            Self::UnknownDevice => "unknown_device".to_owned(),
            Self::BadCredentials => "bad_credentials".to_owned(),
            Self::DuplicateSeq { .. } => "duplicate_seq".to_owned(),
            Self::UnsupportedEnvelopeVersion { version } => {
                format!("unsupported_envelope_version:{version}")
            }
            Self::RateLimited => "rate_limited".to_owned(),
            Self::PayloadTooLarge { .. } => "payload_too_large".to_owned(),
            Self::PersistenceFailed { .. } => "persistence_failed".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_defaults_to_v1() {
        assert_eq!(EnvelopeVersion::default(), EnvelopeVersion::V1);
    }

    #[test]
    fn unknown_version_is_unsupported() {
        let v: EnvelopeVersion = "7".to_owned().into();
        assert!(!v.is_supported());
        assert_eq!(v.to_string(), "7");
    }

    #[test]
    fn rejection_reason_code_embeds_version() {
        let reason = RejectionReason::UnsupportedEnvelopeVersion {
            version: "2".into(),
        };
        assert_eq!(reason.code(), "unsupported_envelope_version:2");
    }

    #[test]
    fn envelope_serde_roundtrip() {
        let env = Envelope::new("dev-1", 1_700_000_000.0)
            .with_metric("temp_c", MetricValue::Number(41.2))
            .with_seq(7);
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.device_id.as_str(), "dev-1");
        assert_eq!(back.seq, Some(7));
        assert_eq!(
            back.metrics.get("temp_c").unwrap().as_f64(),
            Some(41.2)
        );
    }

    #[test]
    fn metric_value_bool_as_f64() {
        assert_eq!(MetricValue::Bool(true).as_f64(), Some(1.0));
        assert_eq!(MetricValue::Bool(false).as_f64(), Some(0.0));
    }
}
