//! Builders and a matcher for the dot-separated subject strings:
//! `telemetry.<tenant>.<device>`, `alerts.<tenant>`, `routes.<tenant>`,
//! `shadow.<tenant>.<device>`, `commands.<tenant>.<device>`.

#[must_use]
pub fn telemetry(tenant_id: &str, device_id: &str) -> String {
    format!("telemetry.{tenant_id}.{device_id}")
}

#[must_use]
pub fn alerts(tenant_id: &str) -> String {
    format!("alerts.{tenant_id}")
}

#[must_use]
pub fn routes(tenant_id: &str) -> String {
    format!("routes.{tenant_id}")
}

#[must_use]
pub fn shadow(tenant_id: &str, device_id: &str) -> String {
    format!("shadow.{tenant_id}.{device_id}")
}

#[must_use]
pub fn commands(tenant_id: &str, device_id: &str) -> String {
    format!("commands.{tenant_id}.{device_id}")
}

/// Match a concrete subject against a pattern where each dot-separated
/// segment is either a literal or `*` (matches exactly one segment).
#[must_use]
pub fn matches(pattern: &str, subject: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('.').collect();
    let subject_segments: Vec<&str> = subject.split('.').collect();
    if pattern_segments.len() != subject_segments.len() {
        return false;
    }
    pattern_segments
        .iter()
        .zip(subject_segments.iter())
        .all(|(p, s)| *p == "*" || p == s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_produce_documented_shape() {
        assert_eq!(telemetry("t1", "d1"), "telemetry.t1.d1");
        assert_eq!(alerts("t1"), "alerts.t1");
        assert_eq!(routes("t1"), "routes.t1");
    }

    #[test]
    fn wildcard_matches_single_segment() {
        assert!(matches("telemetry.*.*", "telemetry.t1.d1"));
        assert!(!matches("telemetry.*.*", "telemetry.t1"));
        assert!(!matches("telemetry.*", "telemetry.t1.d1"));
    }

    #[test]
    fn literal_segment_must_match_exactly() {
        assert!(matches("alerts.t1", "alerts.t1"));
        assert!(!matches("alerts.t1", "alerts.t2"));
    }
}
