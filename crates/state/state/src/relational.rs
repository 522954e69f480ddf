use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulsegrid_core::{
    Alert, AlertDetails, AlertId, AlertRule, AlertType, ChannelId, Confidence, DeadLetter, Device,
    DeviceCredential, DeviceId, EscalationPolicy, JobId, NotificationAttempt, NotificationChannel,
    NotificationJob, NotificationRoutingRule, OnCallSchedule, PolicyId, QuarantineEvent, RuleId,
    ScheduleId, SiteId, TenantId,
};

use crate::error::StateError;
use crate::types::{CloseOutcome, JobClaimOutcome, JobInsertOutcome, OpenOrUpdateOutcome};

/// The relational system of record: devices, credentials, rules, alerts,
/// escalation policies, on-call schedules, channels, routing rules,
/// notification jobs, attempts, dead letters, and quarantine.
///
/// Every method is scoped to a `tenant_id` argument. Implementations run the
/// query through the Tenant Isolation Substrate's `with_tenant` (or
/// `with_operator` for the handful of cross-tenant administrative calls) so
/// row-level policy is enforced regardless of caller discipline.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    // -- Devices -----------------------------------------------------------

    async fn upsert_device(&self, device: &Device) -> Result<(), StateError>;

    async fn get_device(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
    ) -> Result<Option<Device>, StateError>;

    async fn record_heartbeat(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
        seen_at: DateTime<Utc>,
    ) -> Result<(), StateError>;

    async fn insert_credential(&self, credential: &DeviceCredential) -> Result<(), StateError>;

    /// Look up the active credential matching `client_id`, used to
    /// authenticate an ingest connection and derive its tenant/device.
    async fn find_active_credential(
        &self,
        client_id: &str,
    ) -> Result<Option<DeviceCredential>, StateError>;

    // -- Alert rules ---------------------------------------------------------

    async fn enabled_rules(&self, tenant_id: &TenantId) -> Result<Vec<AlertRule>, StateError>;

    async fn get_rule(
        &self,
        tenant_id: &TenantId,
        rule_id: &RuleId,
    ) -> Result<Option<AlertRule>, StateError>;

    // -- Alert lifecycle -----------------------------------------------------

    /// Atomically open a new alert for `fingerprint` if none is OPEN or
    /// ACKNOWLEDGED, or refresh the existing one's mutable fields.
    ///
    /// Invariant: at most one row with status OPEN or ACKNOWLEDGED exists
    /// per `(tenant_id, fingerprint)`; implementations enforce this with a
    /// unique partial index plus an upsert, not a check-then-act race.
    async fn open_or_update_alert(
        &self,
        tenant_id: &TenantId,
        fingerprint: &str,
        alert_type: AlertType,
        fields: AlertUpsertFields,
    ) -> Result<OpenOrUpdateOutcome, StateError>;

    /// Atomically close the live (OPEN/ACKNOWLEDGED) alert for `fingerprint`,
    /// if one exists.
    async fn close_alert(
        &self,
        tenant_id: &TenantId,
        fingerprint: &str,
    ) -> Result<CloseOutcome, StateError>;

    async fn acknowledge_alert(
        &self,
        tenant_id: &TenantId,
        alert_id: &AlertId,
    ) -> Result<Option<Alert>, StateError>;

    /// Fetch one alert by id, used by the delivery worker to build
    /// notification payloads from a job's `alert_id`.
    async fn get_alert(
        &self,
        tenant_id: &TenantId,
        alert_id: &AlertId,
    ) -> Result<Option<Alert>, StateError>;

    /// Advance an alert's escalation level, used by the per-tick escalation
    /// scheduler.
    async fn advance_escalation(
        &self,
        tenant_id: &TenantId,
        alert_id: &AlertId,
        new_level: u32,
        next_escalation_at: Option<DateTime<Utc>>,
    ) -> Result<Alert, StateError>;

    /// Open alerts whose linked rule has an escalation policy and whose
    /// `next_escalation_at` has elapsed.
    async fn alerts_due_for_escalation(
        &self,
        tenant_id: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Alert, PolicyId)>, StateError>;

    // -- Escalation policies & on-call schedules ------------------------------

    async fn get_escalation_policy(
        &self,
        tenant_id: &TenantId,
        policy_id: &PolicyId,
    ) -> Result<Option<EscalationPolicy>, StateError>;

    async fn get_oncall_schedule(
        &self,
        tenant_id: &TenantId,
        schedule_id: &ScheduleId,
    ) -> Result<Option<OnCallSchedule>, StateError>;

    // -- Channels & routing rules ----------------------------------------------

    async fn get_channel(
        &self,
        tenant_id: &TenantId,
        channel_id: &ChannelId,
    ) -> Result<Option<NotificationChannel>, StateError>;

    /// Enabled routing rules for a tenant, ordered by `priority` ascending
    /// then `created_at` ascending.
    async fn enabled_routing_rules(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<NotificationRoutingRule>, StateError>;

    // -- Notification jobs -----------------------------------------------------

    /// Idempotent insert keyed by `(alert_id, channel_id, deliver_on_event)`.
    async fn insert_job_if_absent(
        &self,
        job: NotificationJob,
    ) -> Result<JobInsertOutcome, StateError>;

    async fn get_job(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
    ) -> Result<Option<NotificationJob>, StateError>;

    /// Compare-and-set PENDING -> PROCESSING. Returns `NotClaimable` if
    /// another worker already holds the job.
    async fn claim_job(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
    ) -> Result<JobClaimOutcome, StateError>;

    async fn mark_job_completed(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
    ) -> Result<(), StateError>;

    /// Record a retryable failure: increments `attempts`, returns the job to
    /// PENDING, and sets `next_attempt_at`.
    async fn reschedule_job(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<NotificationJob, StateError>;

    /// Record a permanent failure: sets status FAILED.
    async fn mark_job_failed(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
        error: &str,
    ) -> Result<NotificationJob, StateError>;

    /// Jobs whose `next_attempt_at` has elapsed, used by the delivery
    /// worker's ack-and-schedule retry strategy.
    async fn jobs_due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<NotificationJob>, StateError>;

    async fn record_attempt(&self, attempt: &NotificationAttempt) -> Result<(), StateError>;

    async fn next_attempt_no(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
    ) -> Result<u32, StateError>;

    async fn insert_dead_letter(&self, dead_letter: &DeadLetter) -> Result<(), StateError>;

    // -- Quarantine -------------------------------------------------------------

    async fn insert_quarantine_event(&self, event: &QuarantineEvent) -> Result<(), StateError>;
}

/// The mutable fields supplied to `open_or_update_alert`, mirroring
/// [`pulsegrid_core::AlertUpsert`] but keeping the trait's signature free of
/// a dependency on the fingerprint being embedded in the struct twice.
#[derive(Debug, Clone)]
pub struct AlertUpsertFields {
    pub device_id: DeviceId,
    pub site_id: Option<SiteId>,
    pub severity: u8,
    pub confidence: Confidence,
    pub summary: String,
    pub details: AlertDetails,
    /// `next_escalation_at` to carry on a brand-new alert row, derived from
    /// the linked rule's escalation policy level-1 delay. Only honored when
    /// this call actually opens a new alert; an update to an already-live
    /// alert leaves its existing escalation schedule untouched.
    pub initial_next_escalation_at: Option<DateTime<Utc>>,
}
