use std::sync::Arc;
use std::time::Duration;

use pulsegrid_bus::EventBus;
use pulsegrid_core::{DeviceId, Envelope, RejectionReason, TenantId};
use pulsegrid_state::{RelationalStore, TimeSeriesStore};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};

use crate::pipeline::IngestPipeline;
use crate::validate;

/// Connection settings for the MQTT ingest subscriber, the second of the
/// two transports that feed into one ingest pipeline.
#[derive(Debug, Clone)]
pub struct MqttIngestConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

impl Default for MqttIngestConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 1883,
            client_id: "pulsegrid-ingest".to_owned(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
        }
    }
}

/// Parsed `telemetry/<tenant>/<device>/<kind>` topic segments.
struct TopicParts<'a> {
    tenant: &'a str,
    device: &'a str,
}

fn parse_topic(topic: &str) -> Option<TopicParts<'_>> {
    let mut segments = topic.split('/');
    if segments.next()? != "telemetry" {
        return None;
    }
    let tenant = segments.next()?;
    let device = segments.next()?;
    Some(TopicParts { tenant, device })
}

/// Run the MQTT subscriber until `shutdown` fires. The broker is
/// responsible for authenticating the connection and scoping publish ACLs;
/// this subscriber trusts the topic's tenant/device segments for any
/// message it receives and runs it through the same `accept` pipeline as
/// the HTTP transport.
pub async fn run_mqtt_subscriber<T, R, B>(
    config: MqttIngestConfig,
    pipeline: Arc<IngestPipeline<T, R, B>>,
    max_payload_bytes: usize,
    shutdown: tokio_util::sync::CancellationToken,
) where
    T: TimeSeriesStore + 'static,
    R: RelationalStore + 'static,
    B: EventBus + 'static,
{
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(config.keep_alive);
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(options, 100);
    if let Err(err) = client.subscribe("telemetry/+/+/+", QoS::AtLeastOnce).await {
        tracing::error!(error = %err, "failed to subscribe to telemetry topics");
        return;
    }

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                tracing::info!("mqtt ingest subscriber shutting down");
                return;
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        handle_publish(&pipeline, &publish.topic, &publish.payload, max_payload_bytes).await;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "mqtt eventloop error, reconnecting");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

async fn handle_publish<T, R, B>(
    pipeline: &Arc<IngestPipeline<T, R, B>>,
    topic: &str,
    payload: &[u8],
    max_payload_bytes: usize,
) where
    T: TimeSeriesStore + 'static,
    R: RelationalStore + 'static,
    B: EventBus + 'static,
{
    let Some(parts) = parse_topic(topic) else {
        tracing::warn!(topic, "received publish on unrecognized topic, dropping");
        return;
    };

    let tenant_id = TenantId::new(parts.tenant);
    let device_id = DeviceId::new(parts.device);

    let config = crate::config::IngestConfig { max_payload_bytes, ..crate::config::IngestConfig::default() };
    if let Err(reason) = validate::validate_payload_size(payload.len(), &config) {
        tracing::warn!(topic, "payload too large, dropping");
        let placeholder = serde_json::json!({ "size_bytes": payload.len() });
        pipeline.record_rejection(&tenant_id, topic, &device_id, &placeholder, reason).await;
        return;
    }

    let raw_payload: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(topic, error = %err, "invalid json payload, dropping");
            let placeholder = serde_json::json!({ "size_bytes": payload.len() });
            pipeline
                .record_rejection(
                    &tenant_id,
                    topic,
                    &device_id,
                    &placeholder,
                    RejectionReason::SchemaInvalid { detail: err.to_string() },
                )
                .await;
            return;
        }
    };

    let envelope: Envelope = match serde_json::from_value(raw_payload.clone()) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::warn!(topic, error = %err, "envelope schema invalid, dropping");
            pipeline
                .record_rejection(
                    &tenant_id,
                    topic,
                    &device_id,
                    &raw_payload,
                    RejectionReason::SchemaInvalid { detail: err.to_string() },
                )
                .await;
            return;
        }
    };

    if envelope.device_id.as_str() != parts.device {
        tracing::warn!(topic, "envelope device_id does not match topic, dropping");
        pipeline
            .record_rejection(
                &tenant_id,
                topic,
                &device_id,
                &raw_payload,
                RejectionReason::SchemaInvalid { detail: "envelope device_id does not match topic".to_owned() },
            )
            .await;
        return;
    }

    if let Err(reason) = pipeline.accept(&tenant_id, topic, envelope, &raw_payload).await {
        tracing::debug!(topic, reason = %reason.code(), "mqtt envelope rejected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_topic() {
        let parts = parse_topic("telemetry/t1/d1/telemetry").unwrap();
        assert_eq!(parts.tenant, "t1");
        assert_eq!(parts.device, "d1");
    }

    #[test]
    fn rejects_wrong_prefix() {
        assert!(parse_topic("shadow/t1/d1").is_none());
    }

    #[test]
    fn rejects_short_topic() {
        assert!(parse_topic("telemetry/t1").is_none());
    }
}
