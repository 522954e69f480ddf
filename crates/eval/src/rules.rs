use pulsegrid_core::{AlertDetails, AlertRule, Confidence, DeviceId, SiteId};
use pulsegrid_state::{DeviceRollup, TimeSeriesStore, WindowSampleCounts};

use crate::error::EvalError;

/// The outcome of evaluating one rule against one device for a tick.
pub enum RuleOutcome {
    /// The rule's predicate is satisfied; the alert should be opened or
    /// refreshed with the given observed value.
    Fire { observed_value: f64 },
    /// The rule's predicate is not satisfied, the metric is absent, or
    /// (for windowed rules) not every sample in the window breaches; any
    /// live alert for this rule/device should be closed.
    Clear,
}

/// Evaluate one rule against one device.
///
/// `duration_seconds == 0` evaluates the predicate on the rollup's latest
/// sample. `duration_seconds > 0` queries the time-series store for the
/// window's sample counts and fires only when every sample in the window
/// breaches (`total > 0 && breaching == total`).
pub async fn evaluate_rule(
    rule: &AlertRule,
    rollup: &DeviceRollup,
    timeseries: &dyn TimeSeriesStore,
    tenant_id: &pulsegrid_core::TenantId,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<RuleOutcome, EvalError> {
    if !rule.matches_site(rollup.site_id.as_ref()) {
        return Ok(RuleOutcome::Clear);
    }

    if rule.duration_seconds == 0 {
        let Some(observed) = rollup.metrics.get(&rule.metric_name).copied() else {
            return Ok(RuleOutcome::Clear);
        };
        return Ok(if rule.operator.evaluate(observed, rule.threshold) {
            RuleOutcome::Fire { observed_value: observed }
        } else {
            RuleOutcome::Clear
        });
    }

    let counts: WindowSampleCounts = timeseries
        .window_sample_counts(tenant_id, &rollup.device_id, rule, now)
        .await?;
    if !counts.all_breaching() {
        return Ok(RuleOutcome::Clear);
    }
    // The observed value reported in the alert is the latest sample, even
    // though the fire decision is based on the whole window.
    let observed = rollup.metrics.get(&rule.metric_name).copied().unwrap_or(rule.threshold);
    Ok(RuleOutcome::Fire { observed_value: observed })
}

/// Render the human-readable alert summary, e.g. `temp_c (41.2) > 40`.
#[must_use]
pub fn summary_for(rule: &AlertRule, observed_value: f64) -> String {
    format!("{} ({}) {} {}", rule.metric_name, observed_value, rule.operator.symbol(), rule.threshold)
}

#[must_use]
pub fn details_for(rule: &AlertRule, observed_value: f64) -> AlertDetails {
    AlertDetails {
        rule_id: Some(rule.rule_id.to_string()),
        metric_name: Some(rule.metric_name.clone()),
        observed_value: Some(observed_value),
        operator: Some(rule.operator.symbol().to_owned()),
        threshold: Some(rule.threshold),
        extra: serde_json::Map::new(),
    }
}

#[must_use]
pub fn upsert_fields(
    device_id: DeviceId,
    site_id: Option<SiteId>,
    rule: &AlertRule,
    observed_value: f64,
) -> pulsegrid_state::relational::AlertUpsertFields {
    pulsegrid_state::relational::AlertUpsertFields {
        device_id,
        site_id,
        severity: rule.severity,
        confidence: Confidence::CERTAIN,
        summary: summary_for(rule, observed_value),
        details: details_for(rule, observed_value),
        initial_next_escalation_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsegrid_core::{ThresholdOperator, TenantId};
    use pulsegrid_state_memory::MemoryTimeSeriesStore;
    use std::collections::HashMap;

    fn rollup(device: &str, metrics: &[(&str, f64)]) -> DeviceRollup {
        DeviceRollup {
            device_id: DeviceId::new(device),
            site_id: None,
            metrics: metrics.iter().map(|(k, v)| ((*k).to_owned(), *v)).collect(),
            last_seen_at: Some(chrono::Utc::now()),
        }
    }

    #[tokio::test]
    async fn fire_on_first_sample_when_duration_is_zero() {
        let rule = AlertRule::new("t1", "r1", "hot", "temp_c", ThresholdOperator::Gt, 40.0);
        let store = MemoryTimeSeriesStore::new();
        let outcome = evaluate_rule(&rule, &rollup("d1", &[("temp_c", 41.2)]), &store, &TenantId::new("t1"), chrono::Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, RuleOutcome::Fire { observed_value } if observed_value == 41.2));
    }

    #[tokio::test]
    async fn gt_boundary_does_not_fire_ge_does() {
        let gt = AlertRule::new("t1", "r1", "hot", "temp_c", ThresholdOperator::Gt, 40.0);
        let ge = AlertRule::new("t1", "r2", "hot", "temp_c", ThresholdOperator::Ge, 40.0);
        let store = MemoryTimeSeriesStore::new();
        let tenant = TenantId::new("t1");
        let r = rollup("d1", &[("temp_c", 40.0)]);

        let gt_outcome = evaluate_rule(&gt, &r, &store, &tenant, chrono::Utc::now()).await.unwrap();
        assert!(matches!(gt_outcome, RuleOutcome::Clear));

        let ge_outcome = evaluate_rule(&ge, &r, &store, &tenant, chrono::Utc::now()).await.unwrap();
        assert!(matches!(ge_outcome, RuleOutcome::Fire { .. }));
    }

    #[tokio::test]
    async fn missing_metric_clears() {
        let rule = AlertRule::new("t1", "r1", "hot", "temp_c", ThresholdOperator::Gt, 40.0);
        let store = MemoryTimeSeriesStore::new();
        let outcome = evaluate_rule(&rule, &rollup("d1", &[]), &store, &TenantId::new("t1"), chrono::Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, RuleOutcome::Clear));
    }

    #[test]
    fn summary_matches_scenario_format() {
        let rule = AlertRule::new("t1", "r1", "hot", "temp_c", ThresholdOperator::Gt, 40.0);
        assert_eq!(summary_for(&rule, 41.2), "temp_c (41.2) > 40");
    }
}
