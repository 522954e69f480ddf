//! Webhook delivery channel: HTTP POST a JSON body, signed with
//! HMAC-SHA256 in the `X-Pulse-Signature` header.

use std::collections::HashMap;
use std::time::Duration;

use hmac::{Hmac, Mac};
use pulsegrid_core::DeliveryOutcome;
use sha2::Sha256;

const TIMEOUT: Duration = Duration::from_secs(10);

type HmacSha256 = Hmac<Sha256>;

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// POST `body` to `url`, signing it with `signing_secret` and attaching
/// `headers` verbatim. Classifies the response: network errors and
/// 5xx/429 are retryable, other 4xx are permanent.
pub async fn send(
    client: &reqwest::Client,
    url: &str,
    signing_secret: &str,
    headers: &HashMap<String, String>,
    body: &[u8],
) -> DeliveryOutcome {
    let signature = sign(signing_secret, body);
    let mut request = client
        .post(url)
        .timeout(TIMEOUT)
        .header("X-Pulse-Signature", signature)
        .header("Content-Type", "application/json")
        .body(body.to_vec());
    for (name, value) in headers {
        request = request.header(name, value);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            return DeliveryOutcome::Retryable {
                transport_status: None,
                error: err.to_string(),
            };
        }
    };

    let status = response.status();
    if status.is_success() {
        return DeliveryOutcome::Success { transport_status: Some(status.as_str().to_owned()) };
    }

    let error = response
        .text()
        .await
        .unwrap_or_else(|_| "webhook returned a non-success status".to_owned());
    let status_code = Some(status.as_str().to_owned());
    if status.is_server_error() || matches!(status.as_u16(), 408 | 429) {
        DeliveryOutcome::Retryable { transport_status: status_code, error }
    } else {
        DeliveryOutcome::Permanent { transport_status: status_code, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_hex() {
        let sig_a = sign("secret", b"{\"hello\":true}");
        let sig_b = sign("secret", b"{\"hello\":true}");
        assert_eq!(sig_a, sig_b);
        assert!(sig_a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_bodies_sign_differently() {
        let sig_a = sign("secret", b"one");
        let sig_b = sign("secret", b"two");
        assert_ne!(sig_a, sig_b);
    }
}
