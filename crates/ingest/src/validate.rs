use chrono::Utc;
use pulsegrid_core::{Envelope, RejectionReason};

use crate::config::IngestConfig;

/// Validate a parsed envelope against the static rules: envelope version,
/// clock skew, and payload size. Rate limiting and sequence dedup are
/// separate, stateful checks run by the pipeline.
pub fn validate_envelope(envelope: &Envelope, config: &IngestConfig) -> Result<(), RejectionReason> {
    if !envelope.version.is_supported() {
        return Err(RejectionReason::UnsupportedEnvelopeVersion {
            version: envelope.version.to_string(),
        });
    }

    let now = Utc::now().timestamp() as f64;
    let skew = (now - envelope.ts).abs();
    if skew > config.max_clock_skew.as_secs_f64() {
        return Err(RejectionReason::ClockSkew { skew_seconds: skew });
    }

    Ok(())
}

/// Validate raw payload size before any parsing happens, so an oversized
/// body is rejected without deserializing it.
pub fn validate_payload_size(bytes: usize, config: &IngestConfig) -> Result<(), RejectionReason> {
    if bytes > config.max_payload_bytes {
        return Err(RejectionReason::PayloadTooLarge { bytes, max_bytes: config.max_payload_bytes });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsegrid_core::MetricValue;

    #[test]
    fn accepts_well_formed_envelope() {
        let config = IngestConfig::default();
        let envelope = Envelope::new("d1", Utc::now().timestamp() as f64)
            .with_metric("temp_c", MetricValue::Number(21.0));
        assert!(validate_envelope(&envelope, &config).is_ok());
    }

    #[test]
    fn rejects_unsupported_version() {
        let config = IngestConfig::default();
        let mut envelope = Envelope::new("d1", Utc::now().timestamp() as f64);
        envelope.version = "2".to_owned().into();
        let err = validate_envelope(&envelope, &config).unwrap_err();
        assert_eq!(err.code(), "unsupported_envelope_version:2");
    }

    #[test]
    fn rejects_clock_skew_beyond_tolerance() {
        let config = IngestConfig::default();
        let stale_ts = (Utc::now().timestamp() - 600) as f64;
        let envelope = Envelope::new("d1", stale_ts);
        let err = validate_envelope(&envelope, &config).unwrap_err();
        assert_eq!(err.code(), "clock_skew");
    }

    #[test]
    fn rejects_oversized_payload() {
        let config = IngestConfig::default();
        let err = validate_payload_size(config.max_payload_bytes + 1, &config).unwrap_err();
        assert_eq!(err.code(), "payload_too_large");
    }
}
