use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::{AlertEvent, AlertLifecycleEvent, AlertType};
use crate::ids::{ChannelId, RoutingRuleId, SiteId, TenantId};

/// A routing rule mapping alert events to a channel, filtered by severity,
/// alert type, site, device prefix, and which lifecycle events to deliver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRoutingRule {
    pub tenant_id: TenantId,
    pub rule_id: RoutingRuleId,
    pub channel_id: ChannelId,
    pub min_severity: u8,
    pub alert_type: Option<AlertType>,
    pub site_ids: Option<Vec<SiteId>>,
    pub device_prefixes: Option<Vec<String>>,
    pub deliver_on: Vec<AlertLifecycleEvent>,
    pub priority: i32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl NotificationRoutingRule {
    /// Whether this rule matches the given alert event: severity, alert
    /// type, site, device prefix, and lifecycle event must all pass.
    #[must_use]
    pub fn matches(&self, event: &AlertEvent) -> bool {
        if !self.enabled {
            return false;
        }
        if event.severity < self.min_severity {
            return false;
        }
        if let Some(alert_type) = self.alert_type {
            if alert_type != event.alert_type {
                return false;
            }
        }
        if let Some(site_ids) = &self.site_ids {
            if !site_ids.is_empty() {
                let matches = event
                    .site_id
                    .as_ref()
                    .is_some_and(|s| site_ids.contains(s));
                if !matches {
                    return false;
                }
            }
        }
        if let Some(prefixes) = &self.device_prefixes {
            if !prefixes.is_empty() {
                let device = event.device_id.as_str();
                if !prefixes.iter().any(|p| device.starts_with(p.as_str())) {
                    return false;
                }
            }
        }
        self.deliver_on.contains(&event.event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{AlertId, DeviceId};

    fn event() -> AlertEvent {
        AlertEvent {
            tenant_id: "t1".into(),
            alert_id: AlertId::new("a1"),
            device_id: DeviceId::new("dev-east-01"),
            site_id: Some(SiteId::new("site-1")),
            alert_type: AlertType::Threshold,
            severity: 3,
            event: AlertLifecycleEvent::Opened,
            at: Utc::now(),
        }
    }

    fn base_rule() -> NotificationRoutingRule {
        NotificationRoutingRule {
            tenant_id: "t1".into(),
            rule_id: "r1".into(),
            channel_id: "c1".into(),
            min_severity: 1,
            alert_type: None,
            site_ids: None,
            device_prefixes: None,
            deliver_on: vec![AlertLifecycleEvent::Opened],
            priority: 0,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn severity_filter() {
        let mut rule = base_rule();
        rule.min_severity = 4;
        assert!(!rule.matches(&event()));
    }

    #[test]
    fn wildcard_alert_type_matches() {
        let rule = base_rule();
        assert!(rule.matches(&event()));
    }

    #[test]
    fn device_prefix_filter() {
        let mut rule = base_rule();
        rule.device_prefixes = Some(vec!["dev-west".into()]);
        assert!(!rule.matches(&event()));

        rule.device_prefixes = Some(vec!["dev-east".into()]);
        assert!(rule.matches(&event()));
    }

    #[test]
    fn deliver_on_filter() {
        let mut rule = base_rule();
        rule.deliver_on = vec![AlertLifecycleEvent::Closed];
        assert!(!rule.matches(&event()));
    }

    #[test]
    fn disabled_rule_never_matches() {
        let mut rule = base_rule();
        rule.enabled = false;
        assert!(!rule.matches(&event()));
    }
}
