//! MQTT delivery channel: publish an alert payload to a configured topic
//! on the same broker used for device ingestion.

use std::time::Duration;

use pulsegrid_core::{DeliveryOutcome, MqttQos};
use rumqttc::{AsyncClient, MqttOptions, QoS};

/// Broker connection settings for the delivery-side publisher, shared
/// across every MQTT channel in the deployment (the per-channel config
/// only carries the destination topic).
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 1883,
            client_id: "pulsegrid-delivery".to_owned(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
        }
    }
}

fn to_wire_qos(qos: MqttQos) -> QoS {
    match qos {
        MqttQos::AtMostOnce => QoS::AtMostOnce,
        MqttQos::AtLeastOnce => QoS::AtLeastOnce,
        MqttQos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// A connected publisher. The broker eventloop is driven by a background
/// task spawned in `connect`; `publish` only enqueues onto the client's
/// internal channel, mirroring how the ingest subscriber owns its own
/// polling loop on the other side of the same broker.
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub fn connect(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "mqtt publisher eventloop error, reconnecting");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self { client }
    }

    /// Publish `payload` to `topic`. Enqueue failures (the client's
    /// internal channel is full, or the eventloop has already stopped)
    /// are retryable; there is nothing else that can go wrong before the
    /// broker round trip, which this call does not wait for.
    pub async fn publish(&self, topic: &str, qos: MqttQos, retain: bool, payload: &[u8]) -> DeliveryOutcome {
        match self.client.publish(topic, to_wire_qos(qos), retain, payload.to_vec()).await {
            Ok(()) => DeliveryOutcome::Success { transport_status: None },
            Err(err) => DeliveryOutcome::Retryable { transport_status: None, error: err.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_maps_to_wire_values() {
        assert_eq!(to_wire_qos(MqttQos::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(to_wire_qos(MqttQos::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(to_wire_qos(MqttQos::ExactlyOnce), QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn publish_against_unreachable_broker_does_not_panic() {
        let config = MqttConfig { port: 1, ..MqttConfig::default() };
        let publisher = MqttPublisher::connect(&config);
        let outcome = publisher.publish("pulsegrid/test", MqttQos::AtMostOnce, false, b"{}").await;
        assert!(matches!(outcome, DeliveryOutcome::Success { .. } | DeliveryOutcome::Retryable { .. }));
    }
}
