use pulsegrid_core::{
    AlertEvent, ChannelConfig, JobId, NotificationChannel, NotificationJob, NotificationTarget,
    RuleId, TenantId, new_uuid,
};
use pulsegrid_state::{JobInsertOutcome, RelationalStore};

use crate::error::RouterError;

/// Resolve the on-call responder's email for this event, if the alert's
/// originating rule carries an escalation policy and the level matching the
/// alert's current `escalation_level` targets an on-call schedule.
///
/// Only rule-generated alerts carry an escalation policy (fingerprint
/// `RULE:<rule_id>:<device_id>`); a heartbeat alert's `HEARTBEAT:<device_id>`
/// fingerprint has no rule to resolve, so this returns `None` for those.
async fn resolve_escalation_target_email(
    store: &dyn RelationalStore,
    tenant_id: &TenantId,
    event: &AlertEvent,
) -> Result<Option<String>, RouterError> {
    let Some(alert) = store.get_alert(tenant_id, &event.alert_id).await? else {
        return Ok(None);
    };
    let Some(rule_id) = alert.fingerprint.strip_prefix("RULE:").and_then(|rest| {
        rest.rsplit_once(':').map(|(rule_id, _device_id)| RuleId::from(rule_id))
    }) else {
        return Ok(None);
    };
    let Some(rule) = store.get_rule(tenant_id, &rule_id).await? else {
        return Ok(None);
    };
    let Some(policy_id) = &rule.escalation_policy_id else {
        return Ok(None);
    };
    let Some(policy) = store.get_escalation_policy(tenant_id, policy_id).await? else {
        return Ok(None);
    };
    let Some(level) = policy.levels.iter().find(|l| u32::from(l.level) == alert.escalation_level) else {
        return Ok(None);
    };
    for target in &level.targets {
        if let NotificationTarget::OnCallSchedule { schedule_id } = target
            && let Some(schedule) = store.get_oncall_schedule(tenant_id, schedule_id).await?
        {
            return Ok(schedule.effective_responder(event.at));
        }
    }
    Ok(None)
}

/// Translate one alert lifecycle event into delivery jobs.
///
/// Routing rules are loaded fresh per event (already ordered by `priority`
/// then `created_at` by the store) rather than cached across calls: an
/// in-memory snapshot refreshed per event or on a short TTL is left for
/// the caller to layer on top of this function; `route_event` itself is
/// the pure matching/translation step so it is trivially testable without
/// a cache.
///
/// A malformed or unresolvable rule is logged and skipped; the event still
/// reaches every other rule.
pub async fn route_event(
    store: &dyn RelationalStore,
    tenant_id: &TenantId,
    event: &AlertEvent,
) -> Result<Vec<NotificationJob>, RouterError> {
    let rules = store.enabled_routing_rules(tenant_id).await?;
    let mut inserted = Vec::new();
    // Resolved on the first Email-channel rule that needs it, then reused:
    // the answer only depends on the event's alert/rule/policy, not on
    // which routing rule is currently being matched.
    let mut escalation_email: Option<Option<String>> = None;

    for rule in &rules {
        if !rule.matches(event) {
            continue;
        }

        let channel = match store.get_channel(tenant_id, &rule.channel_id).await {
            Ok(Some(channel)) => channel,
            Ok(None) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    rule_id = %rule.rule_id,
                    channel_id = %rule.channel_id,
                    "routing rule references missing channel, skipping"
                );
                continue;
            }
            Err(err) => {
                tracing::error!(
                    tenant_id = %tenant_id,
                    rule_id = %rule.rule_id,
                    error = %err,
                    "failed to resolve channel, skipping rule"
                );
                continue;
            }
        };
        if !channel_is_usable(&channel) {
            tracing::debug!(
                tenant_id = %tenant_id,
                channel_id = %rule.channel_id,
                "channel disabled, skipping rule"
            );
            continue;
        }

        let resolved_target_email = if matches!(channel.config, ChannelConfig::Email { .. }) {
            if escalation_email.is_none() {
                escalation_email = Some(resolve_escalation_target_email(store, tenant_id, event).await?);
            }
            escalation_email.clone().flatten()
        } else {
            None
        };

        let job = NotificationJob::new(
            tenant_id.clone(),
            JobId::new(new_uuid()),
            event.alert_id.clone(),
            rule.channel_id.clone(),
            event.event,
        )
        .with_resolved_target_email(resolved_target_email);
        match store.insert_job_if_absent(job).await {
            Ok(JobInsertOutcome::Inserted(job)) => inserted.push(job),
            Ok(JobInsertOutcome::AlreadyExists) => {
                tracing::debug!(
                    tenant_id = %tenant_id,
                    alert_id = %event.alert_id,
                    channel_id = %rule.channel_id,
                    "job already exists for this alert/channel/event, skipping"
                );
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(inserted)
}

fn channel_is_usable(channel: &NotificationChannel) -> bool {
    channel.is_enabled
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsegrid_core::{
        AlertId, AlertLifecycleEvent, AlertType, ChannelConfig, DeviceId, NotificationRoutingRule,
    };
    use pulsegrid_state_memory::MemoryRelationalStore;

    fn event() -> AlertEvent {
        AlertEvent {
            tenant_id: TenantId::new("t1"),
            alert_id: AlertId::new("a1"),
            device_id: DeviceId::new("d1"),
            site_id: None,
            alert_type: AlertType::Threshold,
            severity: 4,
            event: AlertLifecycleEvent::Opened,
            at: chrono::Utc::now(),
        }
    }

    fn routing_rule() -> NotificationRoutingRule {
        NotificationRoutingRule {
            tenant_id: TenantId::new("t1"),
            rule_id: "r1".into(),
            channel_id: "c1".into(),
            min_severity: 1,
            alert_type: None,
            site_ids: None,
            device_prefixes: None,
            deliver_on: vec![AlertLifecycleEvent::Opened],
            priority: 0,
            enabled: true,
            created_at: chrono::Utc::now(),
        }
    }

    fn channel() -> NotificationChannel {
        NotificationChannel {
            tenant_id: TenantId::new("t1"),
            channel_id: "c1".into(),
            config: ChannelConfig::Email { to_address: "ops@example.com".into() },
            is_enabled: true,
        }
    }

    #[tokio::test]
    async fn matching_rule_emits_one_job() {
        let store = MemoryRelationalStore::new();
        store.seed_routing_rule(routing_rule());
        store.seed_channel(channel());

        let jobs = route_event(&store, &TenantId::new("t1"), &event()).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].channel_id.as_str(), "c1");
    }

    #[tokio::test]
    async fn replayed_event_does_not_double_send() {
        let store = MemoryRelationalStore::new();
        store.seed_routing_rule(routing_rule());
        store.seed_channel(channel());

        let first = route_event(&store, &TenantId::new("t1"), &event()).await.unwrap();
        let second = route_event(&store, &TenantId::new("t1"), &event()).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 0, "idempotent insert must suppress the duplicate");
    }

    #[tokio::test]
    async fn disabled_channel_is_skipped() {
        let store = MemoryRelationalStore::new();
        store.seed_routing_rule(routing_rule());
        store.seed_channel(NotificationChannel { is_enabled: false, ..channel() });

        let jobs = route_event(&store, &TenantId::new("t1"), &event()).await.unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn missing_channel_is_skipped_not_fatal() {
        let store = MemoryRelationalStore::new();
        store.seed_routing_rule(routing_rule());

        let jobs = route_event(&store, &TenantId::new("t1"), &event()).await.unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn escalated_event_resolves_oncall_schedule_to_effective_email() {
        use pulsegrid_core::{
            AlertDetails, AlertType, Confidence, EscalationLevel, EscalationPolicy, NotificationTarget,
            OnCallLayer, OnCallSchedule, RotationCadence,
        };
        use pulsegrid_state::relational::AlertUpsertFields;

        let store = MemoryRelationalStore::new();
        let tenant = TenantId::new("t1");

        let rotation_start = chrono::Utc::now() - chrono::Duration::days(1);
        store.seed_schedule(
            tenant.clone(),
            OnCallSchedule {
                schedule_id: "sched-1".into(),
                name: "primary".into(),
                timezone: "UTC".into(),
                layers: vec![OnCallLayer {
                    responders: vec!["alice@example.com".into()],
                    cadence: RotationCadence::Weekly,
                    rotation_start,
                }],
                overrides: vec![],
            },
        );
        store.seed_policy(
            tenant.clone(),
            EscalationPolicy {
                policy_id: "p1".into(),
                name: "standard".into(),
                levels: vec![EscalationLevel {
                    level: 1,
                    delay_minutes: 15,
                    targets: vec![NotificationTarget::OnCallSchedule { schedule_id: "sched-1".into() }],
                }],
            },
        );
        let mut rule = pulsegrid_core::AlertRule::new(
            "t1",
            "r1",
            "hot",
            "temp_c",
            pulsegrid_core::ThresholdOperator::Gt,
            40.0,
        );
        rule.escalation_policy_id = Some("p1".into());
        store.seed_rule(rule);
        store.seed_channel(channel());

        let opened = store
            .open_or_update_alert(
                &tenant,
                "RULE:r1:d1",
                AlertType::Threshold,
                AlertUpsertFields {
                    device_id: DeviceId::new("d1"),
                    site_id: None,
                    severity: 3,
                    confidence: Confidence::CERTAIN,
                    summary: "hot".into(),
                    details: AlertDetails { rule_id: Some("r1".into()), ..Default::default() },
                    initial_next_escalation_at: None,
                },
            )
            .await
            .unwrap();
        let alert_id = opened.alert().alert_id.clone();
        store
            .advance_escalation(&tenant, &alert_id, 1, None)
            .await
            .unwrap();

        let escalated_event = AlertEvent {
            tenant_id: tenant.clone(),
            alert_id,
            device_id: DeviceId::new("d1"),
            site_id: None,
            alert_type: AlertType::Threshold,
            severity: 3,
            event: AlertLifecycleEvent::Escalated,
            at: chrono::Utc::now(),
        };
        let rule_deliver_escalated = NotificationRoutingRule {
            deliver_on: vec![AlertLifecycleEvent::Escalated],
            ..routing_rule()
        };
        store.seed_routing_rule(rule_deliver_escalated);

        let jobs = route_event(&store, &tenant, &escalated_event).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].resolved_target_email.as_deref(), Some("alice@example.com"));
    }
}
