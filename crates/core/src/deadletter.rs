use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AlertId, ChannelId, JobId, TenantId};

/// A permanently-failed job, retained for operator replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub tenant_id: TenantId,
    pub job_id: JobId,
    pub alert_id: AlertId,
    pub channel_id: ChannelId,
    pub attempts: u32,
    pub final_error: String,
    pub created_at: DateTime<Utc>,
    pub replayed_at: Option<DateTime<Utc>>,
}

impl DeadLetter {
    #[must_use]
    pub fn new(
        tenant_id: impl Into<TenantId>,
        job_id: impl Into<JobId>,
        alert_id: impl Into<AlertId>,
        channel_id: impl Into<ChannelId>,
        attempts: u32,
        final_error: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            job_id: job_id.into(),
            alert_id: alert_id.into(),
            channel_id: channel_id.into(),
            attempts,
            final_error: final_error.into(),
            created_at: Utc::now(),
            replayed_at: None,
        }
    }

    #[must_use]
    pub fn is_replayed(&self) -> bool {
        self.replayed_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_dead_letter_is_not_replayed() {
        let dl = DeadLetter::new("t1", "job-1", "alert-1", "chan-1", 3, "max retries exceeded");
        assert!(!dl.is_replayed());
    }
}
