use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::JobId;

/// One execution attempt of a [`crate::job::NotificationJob`]. Append-only;
/// `attempt_no` starts at 1 and is strictly increasing per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationAttempt {
    pub job_id: JobId,
    pub attempt_no: u32,
    pub ok: bool,
    pub transport_status: Option<String>,
    #[serde(with = "duration_millis")]
    pub latency: Duration,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl NotificationAttempt {
    #[must_use]
    pub fn success(job_id: impl Into<JobId>, attempt_no: u32, latency: Duration) -> Self {
        Self {
            job_id: job_id.into(),
            attempt_no,
            ok: true,
            transport_status: None,
            latency,
            error: None,
            at: Utc::now(),
        }
    }

    #[must_use]
    pub fn failure(
        job_id: impl Into<JobId>,
        attempt_no: u32,
        latency: Duration,
        transport_status: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            attempt_no,
            ok: false,
            transport_status,
            latency,
            error: Some(error.into()),
            at: Utc::now(),
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(value.as_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_has_no_error() {
        let attempt = NotificationAttempt::success("job-1", 1, Duration::from_millis(120));
        assert!(attempt.ok);
        assert!(attempt.error.is_none());
    }

    #[test]
    fn failure_carries_transport_status() {
        let attempt = NotificationAttempt::failure(
            "job-1",
            2,
            Duration::from_millis(500),
            Some("503".into()),
            "service unavailable",
        );
        assert!(!attempt.ok);
        assert_eq!(attempt.transport_status.as_deref(), Some("503"));
    }

    #[test]
    fn serde_roundtrip() {
        let attempt = NotificationAttempt::success("job-1", 1, Duration::from_millis(42));
        let json = serde_json::to_string(&attempt).unwrap();
        let back: NotificationAttempt = serde_json::from_str(&json).unwrap();
        assert_eq!(back.latency, Duration::from_millis(42));
    }
}
