/// The classified result of one channel provider dispatch, shared between
/// the provider crates and the delivery worker so the retry/permanent-
/// failure decision is made the same way regardless of channel type.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    /// The channel accepted the message.
    Success { transport_status: Option<String> },
    /// A transient failure: network error, 5xx, or 429. The worker
    /// reschedules with backoff.
    Retryable { transport_status: Option<String>, error: String },
    /// A failure that will not resolve on retry: 4xx (except 408/429), an
    /// invalid destination, or a channel-specific permanent rejection.
    Permanent { transport_status: Option<String>, error: String },
}

impl DeliveryOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_not_retryable() {
        let outcome = DeliveryOutcome::Success { transport_status: Some("200".into()) };
        assert!(outcome.is_success());
        assert!(!outcome.is_retryable());
    }
}
