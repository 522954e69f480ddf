use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::AlertLifecycleEvent;
use crate::ids::{AlertId, ChannelId, JobId, TenantId};

/// Status of a [`NotificationJob`] as it moves through the delivery worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A queued delivery. The triple `(alert_id, channel_id, deliver_on_event)`
/// is the idempotency key: at most one job exists per triple, enforced by
/// the storage layer's idempotent insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationJob {
    pub tenant_id: TenantId,
    pub job_id: JobId,
    pub alert_id: AlertId,
    pub channel_id: ChannelId,
    pub deliver_on_event: AlertLifecycleEvent,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// The on-call responder's email at the time this job was routed, when
    /// the originating rule's escalation policy resolved one for the
    /// current escalation level. Takes priority over a channel's static
    /// `to_address` at dispatch so an email channel tied to an on-call
    /// schedule actually reaches whoever is on duty, not a fixed address.
    pub resolved_target_email: Option<String>,
}

impl NotificationJob {
    #[must_use]
    pub fn new(
        tenant_id: impl Into<TenantId>,
        job_id: impl Into<JobId>,
        alert_id: impl Into<AlertId>,
        channel_id: impl Into<ChannelId>,
        deliver_on_event: AlertLifecycleEvent,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            job_id: job_id.into(),
            alert_id: alert_id.into(),
            channel_id: channel_id.into(),
            deliver_on_event,
            status: JobStatus::Pending,
            attempts: 0,
            last_error: None,
            next_attempt_at: None,
            created_at: Utc::now(),
            resolved_target_email: None,
        }
    }

    /// Attach a resolved on-call responder email, used when the routing
    /// rule's channel is backed by an on-call schedule.
    #[must_use]
    pub fn with_resolved_target_email(mut self, email: Option<String>) -> Self {
        self.resolved_target_email = email;
        self
    }

    /// The idempotency key used to deduplicate job creation.
    #[must_use]
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}:{:?}",
            self.alert_id, self.channel_id, self.deliver_on_event
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_is_pending_with_zero_attempts() {
        let job = NotificationJob::new(
            "t1",
            "job-1",
            "alert-1",
            "chan-1",
            AlertLifecycleEvent::Opened,
        );
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
    }

    #[test]
    fn idempotency_key_distinguishes_event() {
        let a = NotificationJob::new(
            "t1",
            "job-1",
            "alert-1",
            "chan-1",
            AlertLifecycleEvent::Opened,
        );
        let b = NotificationJob::new(
            "t1",
            "job-2",
            "alert-1",
            "chan-1",
            AlertLifecycleEvent::Closed,
        );
        assert_ne!(a.idempotency_key(), b.idempotency_key());
    }
}
