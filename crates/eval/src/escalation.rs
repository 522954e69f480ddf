use chrono::{DateTime, Utc};
use pulsegrid_core::{Alert, EscalationPolicy, MetricsRegistry, PolicyId, TenantId};
use pulsegrid_state::RelationalStore;

use crate::error::EvalError;

/// One escalation advanced during a tick, used by the caller to emit the
/// corresponding `ESCALATED` event on the ALERTS subject.
pub struct Escalated {
    pub alert: Alert,
}

/// Advance every open alert whose linked rule has an escalation policy and
/// whose `next_escalation_at` has elapsed.
pub async fn advance_due_escalations(
    store: &dyn RelationalStore,
    tenant_id: &TenantId,
    now: DateTime<Utc>,
) -> Result<Vec<Escalated>, EvalError> {
    let due = store.alerts_due_for_escalation(tenant_id, now).await?;
    let mut escalated = Vec::new();
    for (alert, policy_id) in due {
        match advance_one(store, tenant_id, &alert, &policy_id, now).await {
            Ok(Some(updated)) => escalated.push(Escalated { alert: updated }),
            Ok(None) => {}
            Err(err) => {
                tracing::error!(
                    tenant_id = %tenant_id,
                    alert_id = %alert.alert_id,
                    error = %err,
                    "failed to advance escalation"
                );
            }
        }
    }
    Ok(escalated)
}

async fn advance_one(
    store: &dyn RelationalStore,
    tenant_id: &TenantId,
    alert: &Alert,
    policy_id: &PolicyId,
    now: DateTime<Utc>,
) -> Result<Option<Alert>, EvalError> {
    let Some(policy) = store.get_escalation_policy(tenant_id, policy_id).await? else {
        return Ok(None);
    };
    let Some(next) = policy.next_level(alert.escalation_level) else {
        return Ok(None);
    };
    let next_escalation_at = policy
        .next_level(u32::from(next.level))
        .map(|after| now + chrono::Duration::minutes(i64::from(after.delay_minutes)));
    let updated = store
        .advance_escalation(tenant_id, &alert.alert_id, u32::from(next.level), next_escalation_at)
        .await?;
    Ok(Some(updated))
}

/// The `next_escalation_at` a brand-new alert should be opened with, when
/// its rule links an escalation policy: `opened_at + level 1's
/// delay_minutes`. Returns `None` if the policy doesn't exist or has no
/// level 1 configured, in which case the alert opens with escalation
/// inert, matching a rule whose policy was deleted out from under it.
pub async fn initial_next_escalation_at(
    store: &dyn RelationalStore,
    tenant_id: &TenantId,
    policy_id: &PolicyId,
    opened_at: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, EvalError> {
    let Some(policy) = store.get_escalation_policy(tenant_id, policy_id).await? else {
        return Ok(None);
    };
    Ok(policy
        .next_level(0)
        .map(|level| opened_at + chrono::Duration::minutes(i64::from(level.delay_minutes))))
}

/// The effective email address(es) for one escalation level's targets: an
/// `OnCallSchedule` target resolves through
/// [`pulsegrid_core::OnCallSchedule::effective_responder`] at the event
/// time, while `Email`/`Webhook` targets are returned as-is for the
/// router to act on directly.
pub async fn resolve_oncall_email(
    store: &dyn RelationalStore,
    tenant_id: &TenantId,
    policy: &EscalationPolicy,
    level: u8,
    at: DateTime<Utc>,
) -> Result<Option<String>, EvalError> {
    let Some(level_def) = policy.levels.iter().find(|l| l.level == level) else {
        return Ok(None);
    };
    for target in &level_def.targets {
        if let pulsegrid_core::NotificationTarget::OnCallSchedule { schedule_id } = target {
            if let Some(schedule) = store.get_oncall_schedule(tenant_id, schedule_id).await? {
                return Ok(schedule.effective_responder(at));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsegrid_core::{AlertDetails, AlertType, Confidence, DeviceId, EscalationLevel, NotificationTarget};
    use pulsegrid_state::relational::AlertUpsertFields;
    use pulsegrid_state_memory::MemoryRelationalStore;

    #[tokio::test]
    async fn advances_to_next_level_and_sets_delay() {
        let store = MemoryRelationalStore::new();
        let tenant = TenantId::new("t1");
        store.seed_policy(
            tenant.clone(),
            EscalationPolicy {
                policy_id: "p1".into(),
                name: "standard".into(),
                levels: vec![
                    EscalationLevel {
                        level: 1,
                        delay_minutes: 0,
                        targets: vec![NotificationTarget::Email { address: "a@example.com".into() }],
                    },
                    EscalationLevel {
                        level: 2,
                        delay_minutes: 15,
                        targets: vec![NotificationTarget::Email { address: "b@example.com".into() }],
                    },
                ],
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
        store.seed_rule(rule.clone());

        let fingerprint = rule.fingerprint(&DeviceId::new("d1"));
        let opened = store
            .open_or_update_alert(
                &tenant,
                &fingerprint,
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
        let now = Utc::now();
        store.advance_escalation(&tenant, &alert_id, 0, Some(now - chrono::Duration::seconds(1))).await.unwrap();

        let escalated = advance_due_escalations(&store, &tenant, now).await.unwrap();
        assert_eq!(escalated.len(), 1);
        assert_eq!(escalated[0].alert.escalation_level, 1);
    }

    #[tokio::test]
    async fn opening_an_alert_schedules_its_first_escalation() {
        let store = MemoryRelationalStore::new();
        let tenant = TenantId::new("t1");
        store.seed_policy(
            tenant.clone(),
            EscalationPolicy {
                policy_id: "p1".into(),
                name: "standard".into(),
                levels: vec![EscalationLevel {
                    level: 1,
                    delay_minutes: 15,
                    targets: vec![NotificationTarget::Email { address: "a@example.com".into() }],
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

        let now = Utc::now();
        let next_escalation_at = initial_next_escalation_at(&store, &tenant, &"p1".into(), now).await.unwrap();
        assert_eq!(next_escalation_at, Some(now + chrono::Duration::minutes(15)));

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
                    initial_next_escalation_at: next_escalation_at,
                },
            )
            .await
            .unwrap();
        assert_eq!(opened.alert().next_escalation_at, next_escalation_at);

        // Not yet due: the 15-minute delay hasn't elapsed.
        assert!(advance_due_escalations(&store, &tenant, now).await.unwrap().is_empty());

        // Due once the scheduled time arrives, with no manual seeding.
        let at_due = now + chrono::Duration::minutes(15);
        let escalated = advance_due_escalations(&store, &tenant, at_due).await.unwrap();
        assert_eq!(escalated.len(), 1);
        assert_eq!(escalated[0].alert.escalation_level, 1);
    }
}
