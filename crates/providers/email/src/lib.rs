//! Email delivery channel: enqueue to an SMTP relay.

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use pulsegrid_core::DeliveryOutcome;

/// SMTP relay connection settings, shared across every email channel in
/// the deployment (the per-channel config only carries the destination
/// address).
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

/// Build the transport once at startup; it is cheap to clone and safe to
/// share across concurrent sends.
pub fn build_transport(config: &SmtpConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>, String> {
    AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        .map(|builder| {
            builder
                .port(config.port)
                .credentials(Credentials::new(config.username.clone(), config.password.clone()))
                .build()
        })
        .map_err(|err| err.to_string())
}

/// Send one notification email. Any SMTP-level rejection is treated as
/// retryable; a malformed destination address is permanent since retrying
/// cannot fix it.
pub async fn send(
    transport: &AsyncSmtpTransport<Tokio1Executor>,
    from_address: &str,
    to_address: &str,
    subject: &str,
    body: &str,
) -> DeliveryOutcome {
    let from: Mailbox = match from_address.parse() {
        Ok(mailbox) => mailbox,
        Err(err) => {
            return DeliveryOutcome::Permanent { transport_status: None, error: format!("invalid from address: {err}") };
        }
    };
    let to: Mailbox = match to_address.parse() {
        Ok(mailbox) => mailbox,
        Err(err) => {
            return DeliveryOutcome::Permanent { transport_status: None, error: format!("invalid destination address: {err}") };
        }
    };

    let message = match Message::builder()
        .from(from)
        .to(to)
        .subject(subject)
        .body(body.to_owned())
    {
        Ok(message) => message,
        Err(err) => {
            return DeliveryOutcome::Permanent { transport_status: None, error: err.to_string() };
        }
    };

    match transport.send(message).await {
        Ok(response) => DeliveryOutcome::Success { transport_status: Some(response.code().to_string()) },
        Err(err) => {
            if err.is_permanent() {
                DeliveryOutcome::Permanent { transport_status: None, error: err.to_string() }
            } else {
                // Transient SMTP errors and anything unclassified are
                // retried; a stuck channel eventually reaches MAX attempts
                // and dead-letters regardless.
                DeliveryOutcome::Retryable { transport_status: None, error: err.to_string() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_destination_is_permanent() {
        let config = SmtpConfig {
            host: "localhost".into(),
            port: 2525,
            username: "user".into(),
            password: "pass".into(),
            from_address: "alerts@pulsegrid.example".into(),
        };
        let transport = build_transport(&config).unwrap();
        let outcome = send(&transport, &config.from_address, "not-an-address", "subj", "body").await;
        assert!(matches!(outcome, DeliveryOutcome::Permanent { .. }));
    }
}
