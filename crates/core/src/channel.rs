use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, TenantId};

/// QoS level for an MQTT publish, mirroring the wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MqttQos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Per-`channel_type` configuration. Secrets (webhook HMAC key, SMTP
/// password) are kept out of `Debug` output; see the `Debug` impl below.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "channel_type", rename_all = "snake_case")]
pub enum ChannelConfig {
    Webhook {
        url: String,
        /// Shared secret for the `X-Pulse-Signature` HMAC-SHA256 header.
        /// The `PostgreSQL` backend decrypts this from an
        /// `ENC[AES256-GCM,...]` envelope on read when
        /// `PULSEGRID_CHANNEL_SECRET_KEY` is configured (see
        /// `pulsegrid_crypto`); this field holds the plaintext only
        /// transiently in memory. The in-memory store used by tests and
        /// local development never encrypts it.
        signing_secret: String,
        headers: std::collections::HashMap<String, String>,
    },
    Snmp {
        host: String,
        port: u16,
        community: String,
        oid_prefix: String,
    },
    Email {
        to_address: String,
    },
    Mqtt {
        topic: String,
        qos: MqttQos,
        retain: bool,
    },
}

impl ChannelConfig {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Webhook { .. } => "webhook",
            Self::Snmp { .. } => "snmp",
            Self::Email { .. } => "email",
            Self::Mqtt { .. } => "mqtt",
        }
    }
}

impl std::fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Webhook { url, headers, .. } => f
                .debug_struct("Webhook")
                .field("url", url)
                .field("signing_secret", &"[REDACTED]")
                .field("headers", headers)
                .finish(),
            Self::Snmp {
                host,
                port,
                oid_prefix,
                ..
            } => f
                .debug_struct("Snmp")
                .field("host", host)
                .field("port", port)
                .field("community", &"[REDACTED]")
                .field("oid_prefix", oid_prefix)
                .finish(),
            Self::Email { to_address } => {
                f.debug_struct("Email").field("to_address", to_address).finish()
            }
            Self::Mqtt { topic, qos, retain } => f
                .debug_struct("Mqtt")
                .field("topic", topic)
                .field("qos", qos)
                .field("retain", retain)
                .finish(),
        }
    }
}

/// A configured delivery destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub tenant_id: TenantId,
    pub channel_id: ChannelId,
    pub config: ChannelConfig,
    pub is_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_debug_redacts_secret() {
        let config = ChannelConfig::Webhook {
            url: "https://example.com/hook".into(),
            signing_secret: "super-secret-value".into(),
            headers: std::collections::HashMap::new(),
        };
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super-secret-value"));
    }

    #[test]
    fn snmp_debug_redacts_community() {
        let config = ChannelConfig::Snmp {
            host: "10.0.0.1".into(),
            port: 162,
            community: "public-but-secret".into(),
            oid_prefix: "1.3.6.1.4.1.9999".into(),
        };
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("public-but-secret"));
    }

    #[test]
    fn kind_matches_variant() {
        let config = ChannelConfig::Email {
            to_address: "ops@example.com".into(),
        };
        assert_eq!(config.kind(), "email");
    }
}
