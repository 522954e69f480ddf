use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PolicyId, RuleId, SiteId, TenantId};

/// Comparison operator for a threshold rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThresholdOperator {
    Gt,
    Ge,
    Lt,
    Le,
}

impl ThresholdOperator {
    /// Evaluate `observed <op> threshold`.
    #[must_use]
    pub fn evaluate(self, observed: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => observed > threshold,
            Self::Ge => observed >= threshold,
            Self::Lt => observed < threshold,
            Self::Le => observed <= threshold,
        }
    }

    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }
}

/// A per-tenant threshold rule. Evaluated by the Evaluation Engine every
/// tick against the latest device rollup (duration_seconds == 0) or a
/// windowed sample count (duration_seconds > 0).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub tenant_id: TenantId,
    pub rule_id: RuleId,
    pub name: String,
    pub metric_name: String,
    pub operator: ThresholdOperator,
    pub threshold: f64,
    /// Severity 1..5.
    pub severity: u8,
    /// 0 means fire-on-first-sample; > 0 requires every sample in the
    /// window to breach.
    pub duration_seconds: u64,
    pub site_ids: Option<Vec<SiteId>>,
    pub enabled: bool,
    pub escalation_policy_id: Option<PolicyId>,
    pub updated_at: DateTime<Utc>,
}

impl AlertRule {
    #[must_use]
    pub fn new(
        tenant_id: impl Into<TenantId>,
        rule_id: impl Into<RuleId>,
        name: impl Into<String>,
        metric_name: impl Into<String>,
        operator: ThresholdOperator,
        threshold: f64,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            rule_id: rule_id.into(),
            name: name.into(),
            metric_name: metric_name.into(),
            operator,
            threshold,
            severity: 3,
            duration_seconds: 0,
            site_ids: None,
            enabled: true,
            escalation_policy_id: None,
            updated_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_severity(mut self, severity: u8) -> Self {
        self.severity = severity.clamp(1, 5);
        self
    }

    #[must_use]
    pub fn with_duration_seconds(mut self, seconds: u64) -> Self {
        self.duration_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_site_ids(mut self, site_ids: Vec<SiteId>) -> Self {
        self.site_ids = Some(site_ids);
        self
    }

    #[must_use]
    pub fn with_escalation_policy(mut self, policy_id: impl Into<PolicyId>) -> Self {
        self.escalation_policy_id = Some(policy_id.into());
        self
    }

    /// Whether this rule applies to a device at the given site. An absent or
    /// empty site filter is a wildcard.
    #[must_use]
    pub fn matches_site(&self, site_id: Option<&SiteId>) -> bool {
        match &self.site_ids {
            None => true,
            Some(ids) if ids.is_empty() => true,
            Some(ids) => site_id.is_some_and(|s| ids.contains(s)),
        }
    }

    /// The deterministic fingerprint for alerts generated by this rule
    /// against a specific device.
    #[must_use]
    pub fn fingerprint(&self, device_id: &crate::ids::DeviceId) -> String {
        format!("RULE:{}:{}", self.rule_id, device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gt_boundary_is_exclusive() {
        assert!(!ThresholdOperator::Gt.evaluate(40.0, 40.0));
        assert!(ThresholdOperator::Ge.evaluate(40.0, 40.0));
    }

    #[test]
    fn lt_boundary_is_exclusive() {
        assert!(!ThresholdOperator::Lt.evaluate(20.0, 20.0));
        assert!(ThresholdOperator::Le.evaluate(20.0, 20.0));
    }

    #[test]
    fn severity_is_clamped() {
        let rule = AlertRule::new("t1", "r1", "n", "temp_c", ThresholdOperator::Gt, 40.0)
            .with_severity(9);
        assert_eq!(rule.severity, 5);
        let rule2 = AlertRule::new("t1", "r1", "n", "temp_c", ThresholdOperator::Gt, 40.0)
            .with_severity(0);
        assert_eq!(rule2.severity, 1);
    }

    #[test]
    fn empty_site_filter_is_wildcard() {
        let rule = AlertRule::new("t1", "r1", "n", "temp_c", ThresholdOperator::Gt, 40.0)
            .with_site_ids(vec![]);
        assert!(rule.matches_site(None));
        assert!(rule.matches_site(Some(&SiteId::new("site-1"))));
    }

    #[test]
    fn non_empty_site_filter_restricts() {
        let rule = AlertRule::new("t1", "r1", "n", "temp_c", ThresholdOperator::Gt, 40.0)
            .with_site_ids(vec![SiteId::new("site-1")]);
        assert!(rule.matches_site(Some(&SiteId::new("site-1"))));
        assert!(!rule.matches_site(Some(&SiteId::new("site-2"))));
        assert!(!rule.matches_site(None));
    }

    #[test]
    fn fingerprint_format() {
        let rule = AlertRule::new("t1", "r1", "n", "temp_c", ThresholdOperator::Gt, 40.0);
        assert_eq!(
            rule.fingerprint(&crate::ids::DeviceId::new("d1")),
            "RULE:r1:d1"
        );
    }
}
