use std::sync::Arc;

use bytes::Bytes;
use pulsegrid_bus::EventBus;
use pulsegrid_core::{
    Alert, AlertEvent, AlertLifecycleEvent, AlertType, DeviceId, MetricsRegistry, TenantId,
    heartbeat_fingerprint,
};
use pulsegrid_state::{CloseOutcome, OpenOrUpdateOutcome, RelationalStore, TimeSeriesStore};

use crate::config::EvalConfig;
use crate::error::EvalError;
use crate::escalation;
use crate::rules::{self, RuleOutcome};
use crate::status;

/// Runs the per-tenant, per-tick evaluation pass: fetch rollups, derive
/// status, open/close heartbeat alerts, evaluate rules, and advance due
/// escalations.
///
/// A tick holds no state across invocations except the enabled-rule cache,
/// which is refreshed once per tick (load enabled rules per tenant, cached
/// per tick). All alert lifecycle state lives in the relational store so
/// replicas racing ticks are safe: alert updates go through an atomic
/// open-or-update primitive.
pub struct Evaluator<R, T, B> {
    relational: Arc<R>,
    timeseries: Arc<T>,
    bus: Arc<B>,
    config: EvalConfig,
    metrics: Arc<MetricsRegistry>,
}

impl<R, T, B> Evaluator<R, T, B>
where
    R: RelationalStore + 'static,
    T: TimeSeriesStore + 'static,
    B: EventBus + 'static,
{
    #[must_use]
    pub fn new(relational: Arc<R>, timeseries: Arc<T>, bus: Arc<B>, config: EvalConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self { relational, timeseries, bus, config, metrics }
    }

    /// Run one full tick for `tenant_id`. A failure to reach the store
    /// aborts the tick; the next tick retries. A failure evaluating one
    /// rule is caught and logged without affecting the others.
    pub async fn run_tick(&self, tenant_id: &TenantId) -> Result<(), EvalError> {
        let now = chrono::Utc::now();
        let since = now - chrono::Duration::from_std(self.config.rollup_lookback).unwrap_or_default();
        let rollups = self.timeseries.latest_rollup(tenant_id, since).await?;

        for rollup in &rollups {
            self.evaluate_heartbeat(tenant_id, rollup, now).await?;
        }

        let rules = self.relational.enabled_rules(tenant_id).await?;
        let mut alerts_created = 0u64;
        for rollup in &rollups {
            for rule in &rules {
                self.metrics.incr_counter("evaluator_rules_evaluated_total", &[("tenant", tenant_id.as_str())]);
                match rules::evaluate_rule(rule, rollup, self.timeseries.as_ref(), tenant_id, now).await {
                    Ok(outcome) => {
                        if self.apply_rule_outcome(tenant_id, rule, rollup, outcome, now).await? {
                            alerts_created += 1;
                        }
                    }
                    Err(err) => {
                        tracing::error!(
                            tenant_id = %tenant_id,
                            device_id = %rollup.device_id,
                            rule_id = %rule.rule_id,
                            error = %err,
                            "rule evaluation failed, continuing"
                        );
                    }
                }
            }
        }
        if alerts_created > 0 {
            self.metrics.incr_counter_by("evaluator_alerts_created_total", &[("tenant", tenant_id.as_str())], alerts_created);
        }

        for escalated in escalation::advance_due_escalations(self.relational.as_ref(), tenant_id, now).await? {
            self.publish_event(tenant_id, &escalated.alert, AlertLifecycleEvent::Escalated, now).await;
        }

        Ok(())
    }

    async fn evaluate_heartbeat(
        &self,
        tenant_id: &TenantId,
        rollup: &pulsegrid_state::DeviceRollup,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), EvalError> {
        let derived = status::derive_status(rollup.last_seen_at, now, &self.config);
        let fingerprint = heartbeat_fingerprint(&rollup.device_id);

        if matches!(derived, pulsegrid_core::DeviceStatus::Stale | pulsegrid_core::DeviceStatus::Offline) {
            let fields = pulsegrid_state::relational::AlertUpsertFields {
                device_id: rollup.device_id.clone(),
                site_id: rollup.site_id.clone(),
                severity: 3,
                confidence: pulsegrid_core::Confidence::CERTAIN,
                summary: format!("{} has not reported (status: {derived})", rollup.device_id),
                details: pulsegrid_core::AlertDetails::default(),
                initial_next_escalation_at: None,
            };
            let outcome = self
                .relational
                .open_or_update_alert(tenant_id, &fingerprint, AlertType::NoHeartbeat, fields)
                .await?;
            if let OpenOrUpdateOutcome::Opened(alert) = &outcome {
                self.publish_event(tenant_id, alert, AlertLifecycleEvent::Opened, now).await;
            }
        } else if let CloseOutcome::Closed(alert) = self.relational.close_alert(tenant_id, &fingerprint).await? {
            self.publish_event(tenant_id, &alert, AlertLifecycleEvent::Closed, now).await;
        }
        Ok(())
    }

    /// Apply one rule's evaluation outcome: open/update on fire, close on
    /// clear. Returns `true` if this call opened a brand-new alert (used
    /// by the caller to maintain the per-tick creation counter).
    async fn apply_rule_outcome(
        &self,
        tenant_id: &TenantId,
        rule: &pulsegrid_core::AlertRule,
        rollup: &pulsegrid_state::DeviceRollup,
        outcome: RuleOutcome,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<bool, EvalError> {
        let device_id = rollup.device_id.clone();
        let fingerprint = rule.fingerprint(&device_id);
        match outcome {
            RuleOutcome::Fire { observed_value } => {
                let mut fields = rules::upsert_fields(device_id, rollup.site_id.clone(), rule, observed_value);
                if let Some(policy_id) = &rule.escalation_policy_id {
                    fields.initial_next_escalation_at =
                        escalation::initial_next_escalation_at(self.relational.as_ref(), tenant_id, policy_id, now).await?;
                }
                let result = self
                    .relational
                    .open_or_update_alert(tenant_id, &fingerprint, AlertType::Threshold, fields)
                    .await?;
                if let OpenOrUpdateOutcome::Opened(alert) = &result {
                    self.publish_event(tenant_id, alert, AlertLifecycleEvent::Opened, now).await;
                    return Ok(true);
                }
                Ok(false)
            }
            RuleOutcome::Clear => {
                if let CloseOutcome::Closed(alert) = self.relational.close_alert(tenant_id, &fingerprint).await? {
                    self.publish_event(tenant_id, &alert, AlertLifecycleEvent::Closed, now).await;
                }
                Ok(false)
            }
        }
    }

    async fn publish_event(&self, tenant_id: &TenantId, alert: &Alert, event: AlertLifecycleEvent, at: chrono::DateTime<chrono::Utc>) {
        let payload = AlertEvent {
            tenant_id: tenant_id.clone(),
            alert_id: alert.alert_id.clone(),
            device_id: alert.device_id.clone(),
            site_id: alert.site_id.clone(),
            alert_type: alert.alert_type,
            severity: alert.severity,
            event,
            at,
        };
        let subject = pulsegrid_bus::subject::alerts(tenant_id.as_str());
        match serde_json::to_vec(&payload) {
            Ok(bytes) => {
                if let Err(err) = self.bus.publish(&subject, Bytes::from(bytes)).await {
                    tracing::warn!(tenant_id = %tenant_id, subject = %subject, error = %err, "alert event publish failed");
                }
            }
            Err(err) => tracing::error!(tenant_id = %tenant_id, error = %err, "failed to serialize alert event"),
        }
    }
}

/// Run `Evaluator::run_tick` for every tenant on a fixed `poll_interval`
/// until `shutdown` fires. `tenants` is re-read each tick so newly
/// provisioned tenants are picked up without a restart.
pub async fn run_loop<R, T, B, F, Fut>(
    evaluator: Arc<Evaluator<R, T, B>>,
    poll_interval: std::time::Duration,
    list_tenants: F,
    shutdown: tokio_util::sync::CancellationToken,
) where
    R: RelationalStore + 'static,
    T: TimeSeriesStore + 'static,
    B: EventBus + 'static,
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Vec<TenantId>>,
{
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for tenant_id in list_tenants().await {
                    if let Err(err) = evaluator.run_tick(&tenant_id).await {
                        tracing::error!(tenant_id = %tenant_id, error = %err, "tick aborted, retrying next interval");
                    }
                }
            }
            () = shutdown.cancelled() => {
                tracing::info!("evaluator shutting down");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsegrid_bus::MemoryEventBus;
    use pulsegrid_core::{Envelope, MetricValue, ThresholdOperator};
    use pulsegrid_state_memory::{MemoryRelationalStore, MemoryTimeSeriesStore};

    fn evaluator() -> Evaluator<MemoryRelationalStore, MemoryTimeSeriesStore, MemoryEventBus> {
        Evaluator::new(
            Arc::new(MemoryRelationalStore::new()),
            Arc::new(MemoryTimeSeriesStore::new()),
            Arc::new(MemoryEventBus::new()),
            EvalConfig::default(),
            Arc::new(MetricsRegistry::new()),
        )
    }

    #[tokio::test]
    async fn scenario_rule_opens_then_closes() {
        let eval = evaluator();
        let tenant = TenantId::new("t1");
        let rule = pulsegrid_core::AlertRule::new("t1", "r1", "hot", "temp_c", ThresholdOperator::Gt, 40.0).with_severity(3);
        eval.relational.seed_rule(rule);

        let hot = Envelope::new("d1", chrono::Utc::now().timestamp() as f64).with_metric("temp_c", MetricValue::Number(41.2));
        eval.timeseries
            .insert_batch(&tenant, &[pulsegrid_core::TelemetryRecord::from_envelope(tenant.clone(), None, &hot)])
            .await
            .unwrap();

        eval.run_tick(&tenant).await.unwrap();

        // The tick should have opened the alert; a second open_or_update call
        // for the same fingerprint now finds it live and only refreshes it.
        let opened = eval
            .relational
            .open_or_update_alert(
                &tenant,
                "RULE:r1:d1",
                AlertType::Threshold,
                rules::upsert_fields(DeviceId::new("d1"), None, &pulsegrid_core::AlertRule::new("t1", "r1", "hot", "temp_c", ThresholdOperator::Gt, 40.0), 41.2),
            )
            .await
            .unwrap();
        assert!(matches!(opened, OpenOrUpdateOutcome::Updated(_)));
        assert_eq!(opened.alert().summary, "temp_c (41.2) > 40");

        let cool = Envelope::new("d1", chrono::Utc::now().timestamp() as f64).with_metric("temp_c", MetricValue::Number(39.5));
        eval.timeseries
            .insert_batch(&tenant, &[pulsegrid_core::TelemetryRecord::from_envelope(tenant.clone(), None, &cool)])
            .await
            .unwrap();
        eval.run_tick(&tenant).await.unwrap();

        let closed = eval.relational.close_alert(&tenant, "RULE:r1:d1").await.unwrap();
        assert!(matches!(closed, CloseOutcome::NoOp));
    }
}
