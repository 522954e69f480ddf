use chrono::{DateTime, Utc};
use dashmap::DashMap;

use async_trait::async_trait;
use pulsegrid_core::{
    Alert, AlertId, AlertRule, AlertStatus, AlertType, ChannelId, DeadLetter, Device,
    DeviceCredential, DeviceId, EscalationPolicy, JobId, JobStatus, NotificationAttempt,
    NotificationChannel, NotificationJob, NotificationRoutingRule, OnCallSchedule, PolicyId,
    QuarantineEvent, RuleId, ScheduleId, TenantId,
};
use pulsegrid_state::relational::AlertUpsertFields;
use pulsegrid_state::{
    CloseOutcome, JobClaimOutcome, JobInsertOutcome, OpenOrUpdateOutcome, RelationalStore,
    StateError,
};

/// An in-memory [`RelationalStore`], used by tests and single-process dev
/// deployments. Not tenant-isolated at the storage layer (there is no row-
/// level policy to bypass) -- correctness here is about the lifecycle and
/// idempotency invariants, not the isolation substrate, which is exercised
/// separately against `pulsegrid-tenancy`.
#[derive(Default)]
pub struct MemoryRelationalStore {
    devices: DashMap<(TenantId, DeviceId), Device>,
    credentials_by_client: DashMap<String, DeviceCredential>,
    rules: DashMap<(TenantId, RuleId), AlertRule>,
    alerts: DashMap<(TenantId, AlertId), Alert>,
    live_by_fingerprint: DashMap<(TenantId, String), AlertId>,
    policies: DashMap<(TenantId, PolicyId), EscalationPolicy>,
    schedules: DashMap<(TenantId, ScheduleId), OnCallSchedule>,
    channels: DashMap<(TenantId, ChannelId), NotificationChannel>,
    routing_rules: DashMap<(TenantId, String), NotificationRoutingRule>,
    jobs: DashMap<(TenantId, JobId), NotificationJob>,
    job_index: DashMap<(TenantId, String), JobId>,
    attempts: DashMap<JobId, Vec<NotificationAttempt>>,
    dead_letters: DashMap<(TenantId, JobId), DeadLetter>,
}

impl MemoryRelationalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/dev convenience: seed an alert rule.
    pub fn seed_rule(&self, rule: AlertRule) {
        self.rules
            .insert((rule.tenant_id.clone(), rule.rule_id.clone()), rule);
    }

    /// Test/dev convenience: seed an escalation policy.
    pub fn seed_policy(&self, tenant_id: TenantId, policy: EscalationPolicy) {
        self.policies.insert((tenant_id, policy.policy_id.clone()), policy);
    }

    /// Test/dev convenience: seed an on-call schedule.
    pub fn seed_schedule(&self, tenant_id: TenantId, schedule: OnCallSchedule) {
        self.schedules
            .insert((tenant_id, schedule.schedule_id.clone()), schedule);
    }

    /// Test/dev convenience: seed a channel.
    pub fn seed_channel(&self, channel: NotificationChannel) {
        self.channels
            .insert((channel.tenant_id.clone(), channel.channel_id.clone()), channel);
    }

    /// Test/dev convenience: seed a routing rule.
    pub fn seed_routing_rule(&self, rule: NotificationRoutingRule) {
        self.routing_rules
            .insert((rule.tenant_id.clone(), rule.rule_id.to_string()), rule);
    }

    /// Every distinct tenant with at least one registered device, mirroring
    /// `pulsegrid_state_postgres::list_tenant_ids` for the in-memory backend
    /// used by the server's single-process dev mode.
    #[must_use]
    pub fn tenant_ids(&self) -> Vec<TenantId> {
        let mut seen = std::collections::BTreeSet::new();
        for entry in &self.devices {
            seen.insert(entry.key().0.clone());
        }
        seen.into_iter().collect()
    }
}

#[async_trait]
impl RelationalStore for MemoryRelationalStore {
    async fn upsert_device(&self, device: &Device) -> Result<(), StateError> {
        self.devices
            .insert((device.tenant_id.clone(), device.device_id.clone()), device.clone());
        Ok(())
    }

    async fn get_device(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
    ) -> Result<Option<Device>, StateError> {
        Ok(self
            .devices
            .get(&(tenant_id.clone(), device_id.clone()))
            .map(|d| d.clone()))
    }

    async fn record_heartbeat(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
        seen_at: DateTime<Utc>,
    ) -> Result<(), StateError> {
        if let Some(mut device) = self.devices.get_mut(&(tenant_id.clone(), device_id.clone())) {
            device.last_seen_at = Some(seen_at);
            if device.status != pulsegrid_core::DeviceStatus::Decommissioned {
                device.status = pulsegrid_core::DeviceStatus::Online;
            }
        }
        Ok(())
    }

    async fn insert_credential(&self, credential: &DeviceCredential) -> Result<(), StateError> {
        self.credentials_by_client
            .insert(credential.client_id.clone(), credential.clone());
        Ok(())
    }

    async fn find_active_credential(
        &self,
        client_id: &str,
    ) -> Result<Option<DeviceCredential>, StateError> {
        Ok(self
            .credentials_by_client
            .get(client_id)
            .filter(|c| c.is_active())
            .map(|c| c.clone()))
    }

    async fn enabled_rules(&self, tenant_id: &TenantId) -> Result<Vec<AlertRule>, StateError> {
        Ok(self
            .rules
            .iter()
            .filter(|entry| entry.key().0 == *tenant_id && entry.value().enabled)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn get_rule(
        &self,
        tenant_id: &TenantId,
        rule_id: &RuleId,
    ) -> Result<Option<AlertRule>, StateError> {
        Ok(self
            .rules
            .get(&(tenant_id.clone(), rule_id.clone()))
            .map(|r| r.clone()))
    }

    async fn open_or_update_alert(
        &self,
        tenant_id: &TenantId,
        fingerprint: &str,
        alert_type: AlertType,
        fields: AlertUpsertFields,
    ) -> Result<OpenOrUpdateOutcome, StateError> {
        let key = (tenant_id.clone(), fingerprint.to_owned());
        if let Some(alert_id) = self.live_by_fingerprint.get(&key).map(|e| e.clone()) {
            let mut alert = self
                .alerts
                .get_mut(&(tenant_id.clone(), alert_id))
                .ok_or(StateError::NotFound)?;
            alert.severity = fields.severity;
            alert.confidence = fields.confidence;
            alert.summary = fields.summary;
            alert.details = fields.details;
            alert.site_id = fields.site_id;
            return Ok(OpenOrUpdateOutcome::Updated(alert.clone()));
        }

        let alert_id = AlertId::new(pulsegrid_core::new_uuid());
        let alert = Alert {
            tenant_id: tenant_id.clone(),
            alert_id: alert_id.clone(),
            device_id: fields.device_id,
            site_id: fields.site_id,
            alert_type,
            fingerprint: fingerprint.to_owned(),
            status: AlertStatus::Open,
            severity: fields.severity,
            confidence: fields.confidence,
            summary: fields.summary,
            details: fields.details,
            escalation_level: 0,
            next_escalation_at: fields.initial_next_escalation_at,
            opened_at: Utc::now(),
            closed_at: None,
        };
        self.alerts
            .insert((tenant_id.clone(), alert_id.clone()), alert.clone());
        self.live_by_fingerprint.insert(key, alert_id);
        Ok(OpenOrUpdateOutcome::Opened(alert))
    }

    async fn close_alert(
        &self,
        tenant_id: &TenantId,
        fingerprint: &str,
    ) -> Result<CloseOutcome, StateError> {
        let key = (tenant_id.clone(), fingerprint.to_owned());
        let Some((_, alert_id)) = self.live_by_fingerprint.remove(&key) else {
            return Ok(CloseOutcome::NoOp);
        };
        let mut alert = self
            .alerts
            .get_mut(&(tenant_id.clone(), alert_id))
            .ok_or(StateError::NotFound)?;
        alert.status = AlertStatus::Closed;
        alert.closed_at = Some(Utc::now());
        Ok(CloseOutcome::Closed(alert.clone()))
    }

    async fn acknowledge_alert(
        &self,
        tenant_id: &TenantId,
        alert_id: &AlertId,
    ) -> Result<Option<Alert>, StateError> {
        let Some(mut alert) = self.alerts.get_mut(&(tenant_id.clone(), alert_id.clone())) else {
            return Ok(None);
        };
        if alert.status == AlertStatus::Open {
            alert.status = AlertStatus::Acknowledged;
        }
        Ok(Some(alert.clone()))
    }

    async fn get_alert(
        &self,
        tenant_id: &TenantId,
        alert_id: &AlertId,
    ) -> Result<Option<Alert>, StateError> {
        Ok(self.alerts.get(&(tenant_id.clone(), alert_id.clone())).map(|a| a.clone()))
    }

    async fn advance_escalation(
        &self,
        tenant_id: &TenantId,
        alert_id: &AlertId,
        new_level: u32,
        next_escalation_at: Option<DateTime<Utc>>,
    ) -> Result<Alert, StateError> {
        let mut alert = self
            .alerts
            .get_mut(&(tenant_id.clone(), alert_id.clone()))
            .ok_or(StateError::NotFound)?;
        alert.escalation_level = new_level;
        alert.next_escalation_at = next_escalation_at;
        Ok(alert.clone())
    }

    async fn alerts_due_for_escalation(
        &self,
        tenant_id: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Alert, PolicyId)>, StateError> {
        let mut out = Vec::new();
        for entry in &self.alerts {
            let (tid, _) = entry.key();
            let alert = entry.value();
            if tid != tenant_id || !alert.status.is_live() {
                continue;
            }
            let Some(due_at) = alert.next_escalation_at else {
                continue;
            };
            if due_at > now {
                continue;
            }
            let Some(rule_id) = &alert.details.rule_id else {
                continue;
            };
            let Some(rule) = self.rules.get(&(tenant_id.clone(), RuleId::from(rule_id.as_str())))
            else {
                continue;
            };
            if let Some(policy_id) = &rule.escalation_policy_id {
                out.push((alert.clone(), policy_id.clone()));
            }
        }
        Ok(out)
    }

    async fn get_escalation_policy(
        &self,
        tenant_id: &TenantId,
        policy_id: &PolicyId,
    ) -> Result<Option<EscalationPolicy>, StateError> {
        Ok(self
            .policies
            .get(&(tenant_id.clone(), policy_id.clone()))
            .map(|p| p.clone()))
    }

    async fn get_oncall_schedule(
        &self,
        tenant_id: &TenantId,
        schedule_id: &ScheduleId,
    ) -> Result<Option<OnCallSchedule>, StateError> {
        Ok(self
            .schedules
            .get(&(tenant_id.clone(), schedule_id.clone()))
            .map(|s| s.clone()))
    }

    async fn get_channel(
        &self,
        tenant_id: &TenantId,
        channel_id: &ChannelId,
    ) -> Result<Option<NotificationChannel>, StateError> {
        Ok(self
            .channels
            .get(&(tenant_id.clone(), channel_id.clone()))
            .map(|c| c.clone()))
    }

    async fn enabled_routing_rules(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<NotificationRoutingRule>, StateError> {
        let mut rules: Vec<_> = self
            .routing_rules
            .iter()
            .filter(|e| e.key().0 == *tenant_id && e.value().enabled)
            .map(|e| e.value().clone())
            .collect();
        rules.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(rules)
    }

    async fn insert_job_if_absent(
        &self,
        job: NotificationJob,
    ) -> Result<JobInsertOutcome, StateError> {
        let idx_key = (job.tenant_id.clone(), job.idempotency_key());
        if self.job_index.contains_key(&idx_key) {
            return Ok(JobInsertOutcome::AlreadyExists);
        }
        match self.job_index.entry(idx_key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(JobInsertOutcome::AlreadyExists),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(job.job_id.clone());
                self.jobs
                    .insert((job.tenant_id.clone(), job.job_id.clone()), job.clone());
                Ok(JobInsertOutcome::Inserted(job))
            }
        }
    }

    async fn get_job(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
    ) -> Result<Option<NotificationJob>, StateError> {
        Ok(self
            .jobs
            .get(&(tenant_id.clone(), job_id.clone()))
            .map(|j| j.clone()))
    }

    async fn claim_job(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
    ) -> Result<JobClaimOutcome, StateError> {
        let Some(mut job) = self.jobs.get_mut(&(tenant_id.clone(), job_id.clone())) else {
            return Ok(JobClaimOutcome::NotFound);
        };
        if job.status != JobStatus::Pending {
            return Ok(JobClaimOutcome::NotClaimable);
        }
        job.status = JobStatus::Processing;
        Ok(JobClaimOutcome::Claimed(job.clone()))
    }

    async fn mark_job_completed(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
    ) -> Result<(), StateError> {
        let mut job = self
            .jobs
            .get_mut(&(tenant_id.clone(), job_id.clone()))
            .ok_or(StateError::NotFound)?;
        job.status = JobStatus::Completed;
        Ok(())
    }

    async fn reschedule_job(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<NotificationJob, StateError> {
        let mut job = self
            .jobs
            .get_mut(&(tenant_id.clone(), job_id.clone()))
            .ok_or(StateError::NotFound)?;
        job.attempts += 1;
        job.status = JobStatus::Pending;
        job.last_error = Some(error.to_owned());
        job.next_attempt_at = Some(next_attempt_at);
        Ok(job.clone())
    }

    async fn mark_job_failed(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
        error: &str,
    ) -> Result<NotificationJob, StateError> {
        let mut job = self
            .jobs
            .get_mut(&(tenant_id.clone(), job_id.clone()))
            .ok_or(StateError::NotFound)?;
        job.status = JobStatus::Failed;
        job.last_error = Some(error.to_owned());
        Ok(job.clone())
    }

    async fn jobs_due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<NotificationJob>, StateError> {
        Ok(self
            .jobs
            .iter()
            .filter(|e| {
                e.value().status == JobStatus::Pending
                    && e.value().next_attempt_at.is_some_and(|t| t <= now)
            })
            .take(limit as usize)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn record_attempt(&self, attempt: &NotificationAttempt) -> Result<(), StateError> {
        self.attempts
            .entry(attempt.job_id.clone())
            .or_default()
            .push(attempt.clone());
        Ok(())
    }

    async fn next_attempt_no(
        &self,
        _tenant_id: &TenantId,
        job_id: &JobId,
    ) -> Result<u32, StateError> {
        Ok(self
            .attempts
            .get(job_id)
            .map_or(0, |attempts| attempts.len() as u32)
            + 1)
    }

    async fn insert_dead_letter(&self, dead_letter: &DeadLetter) -> Result<(), StateError> {
        self.dead_letters.insert(
            (dead_letter.tenant_id.clone(), dead_letter.job_id.clone()),
            dead_letter.clone(),
        );
        Ok(())
    }

    async fn insert_quarantine_event(&self, _event: &QuarantineEvent) -> Result<(), StateError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn conformance_suite_passes() {
        let store = MemoryRelationalStore::new();
        pulsegrid_state::testing::run_relational_conformance(&store)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test]
    async fn device_heartbeat_updates_last_seen() {
        let store = MemoryRelationalStore::new();
        let device = Device::provision("t1", "d1", "Thermostat", "thermostat-v2");
        store.upsert_device(&device).await.unwrap();

        let now = Utc::now();
        store
            .record_heartbeat(&TenantId::new("t1"), &DeviceId::new("d1"), now)
            .await
            .unwrap();

        let fetched = store
            .get_device(&TenantId::new("t1"), &DeviceId::new("d1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.last_seen_at, Some(now));
        assert_eq!(fetched.status, pulsegrid_core::DeviceStatus::Online);
    }
}
