//! Render a [`NotificationJob`] + its [`Alert`] into the wire payload each
//! channel type expects.

use pulsegrid_core::{Alert, AlertLifecycleEvent, NotificationJob};
use pulsegrid_provider_snmp::{VarBind, VarBindValue};
use serde::Serialize;

#[derive(Serialize)]
pub struct WebhookPayload<'a> {
    pub alert_id: &'a str,
    pub tenant_id: &'a str,
    pub device_id: &'a str,
    pub alert_type: pulsegrid_core::AlertType,
    pub severity: u8,
    pub status: pulsegrid_core::AlertStatus,
    pub summary: &'a str,
    pub event: AlertLifecycleEvent,
}

#[must_use]
pub fn webhook_body(alert: &Alert, job: &NotificationJob) -> Vec<u8> {
    let payload = WebhookPayload {
        alert_id: alert.alert_id.as_str(),
        tenant_id: alert.tenant_id.as_str(),
        device_id: alert.device_id.as_str(),
        alert_type: alert.alert_type,
        severity: alert.severity,
        status: alert.status,
        summary: &alert.summary,
        event: job.deliver_on_event,
    };
    serde_json::to_vec(&payload).unwrap_or_default()
}

fn event_verb(event: AlertLifecycleEvent) -> &'static str {
    match event {
        AlertLifecycleEvent::Opened => "opened",
        AlertLifecycleEvent::Acknowledged => "acknowledged",
        AlertLifecycleEvent::Closed => "closed",
        AlertLifecycleEvent::Escalated => "escalated",
    }
}

#[must_use]
pub fn email_subject(alert: &Alert, job: &NotificationJob) -> String {
    format!(
        "[PulseGrid] alert {} on {}: {}",
        event_verb(job.deliver_on_event),
        alert.device_id,
        alert.summary
    )
}

#[must_use]
pub fn email_body(alert: &Alert) -> String {
    format!(
        "Device: {}\nSeverity: {}\nStatus: {}\nSummary: {}\nEscalation level: {}\n",
        alert.device_id, alert.severity, alert.status, alert.summary, alert.escalation_level
    )
}

#[must_use]
pub fn snmp_varbinds(alert: &Alert, job: &NotificationJob) -> Vec<VarBind> {
    vec![
        VarBind { oid_suffix: "1", value: VarBindValue::String(alert.device_id.to_string()) },
        VarBind { oid_suffix: "2", value: VarBindValue::Integer(i64::from(alert.severity)) },
        VarBind { oid_suffix: "3", value: VarBindValue::String(alert.summary.clone()) },
        VarBind { oid_suffix: "4", value: VarBindValue::String(event_verb(job.deliver_on_event).to_owned()) },
    ]
}

/// Mirrors `webhook_body`'s shape so an mqtt-subscribing dashboard can use
/// the same parser as a webhook receiver.
#[must_use]
pub fn mqtt_payload(alert: &Alert, job: &NotificationJob) -> Vec<u8> {
    webhook_body(alert, job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsegrid_core::{AlertDetails, AlertStatus, AlertType, Confidence, DeviceId, TenantId};

    fn sample_alert() -> Alert {
        Alert {
            tenant_id: TenantId::new("t1"),
            alert_id: "alert-1".into(),
            device_id: DeviceId::new("d1"),
            site_id: None,
            alert_type: AlertType::Threshold,
            fingerprint: "RULE:r1:d1".into(),
            status: AlertStatus::Open,
            severity: 3,
            confidence: Confidence::CERTAIN,
            summary: "temp_c (41.2) > 40".into(),
            details: AlertDetails::default(),
            escalation_level: 0,
            next_escalation_at: None,
            opened_at: chrono::Utc::now(),
            closed_at: None,
        }
    }

    fn sample_job() -> NotificationJob {
        NotificationJob::new("t1", "job-1", "alert-1", "chan-1", AlertLifecycleEvent::Opened)
    }

    #[test]
    fn webhook_body_is_valid_json_with_summary() {
        let body = webhook_body(&sample_alert(), &sample_job());
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["summary"], "temp_c (41.2) > 40");
    }

    #[test]
    fn email_subject_names_the_device() {
        let subject = email_subject(&sample_alert(), &sample_job());
        assert!(subject.contains("d1"));
        assert!(subject.contains("opened"));
    }

    #[test]
    fn snmp_varbinds_carry_severity() {
        let binds = snmp_varbinds(&sample_alert(), &sample_job());
        assert!(matches!(binds[1].value, VarBindValue::Integer(3)));
    }
}
