//! Channel dispatch: route a job to the provider crate matching its
//! channel's `channel_type`.

use pulsegrid_core::{Alert, ChannelConfig, DeliveryOutcome, NotificationChannel, NotificationJob};
use pulsegrid_provider_mqtt::MqttPublisher;

use crate::payload;

/// Shared, long-lived transports the worker owns across every dispatch.
/// Built once at startup, not per job, mirroring how the ingest/eval
/// crates hold one `reqwest::Client`/store handle for their whole run.
pub struct DispatchClients {
    pub http: reqwest::Client,
    pub smtp: Option<lettre::AsyncSmtpTransport<lettre::Tokio1Executor>>,
    pub smtp_from_address: String,
    pub mqtt: Option<MqttPublisher>,
}

/// Dispatch one job to its channel. Returns `Permanent` if the channel's
/// configuration can't support the attempt at all (e.g. email channel
/// with no SMTP transport configured) -- retrying cannot fix a
/// deployment-level misconfiguration.
pub async fn dispatch(clients: &DispatchClients, channel: &NotificationChannel, alert: &Alert, job: &NotificationJob) -> DeliveryOutcome {
    match &channel.config {
        ChannelConfig::Webhook { url, signing_secret, headers } => {
            let body = payload::webhook_body(alert, job);
            pulsegrid_provider_webhook::send(&clients.http, url, signing_secret, headers, &body).await
        }
        ChannelConfig::Snmp { host, port, community, oid_prefix } => {
            let varbinds = payload::snmp_varbinds(alert, job);
            pulsegrid_provider_snmp::send(host, *port, community, oid_prefix, i64::from(alert.severity), &varbinds).await
        }
        ChannelConfig::Email { to_address } => {
            let Some(transport) = &clients.smtp else {
                return DeliveryOutcome::Permanent {
                    transport_status: None,
                    error: "no SMTP transport configured for this deployment".to_owned(),
                };
            };
            // A resolved on-call responder (routed through an escalation
            // level's on-call schedule target) takes priority over the
            // channel's own static address.
            let recipient = job.resolved_target_email.as_deref().unwrap_or(to_address);
            let subject = payload::email_subject(alert, job);
            let body = payload::email_body(alert);
            pulsegrid_provider_email::send(transport, &clients.smtp_from_address, recipient, &subject, &body).await
        }
        ChannelConfig::Mqtt { topic, qos, retain } => {
            let Some(publisher) = &clients.mqtt else {
                return DeliveryOutcome::Permanent {
                    transport_status: None,
                    error: "no MQTT publisher configured for this deployment".to_owned(),
                };
            };
            let body = payload::mqtt_payload(alert, job);
            publisher.publish(topic, *qos, *retain, &body).await
        }
    }
}
