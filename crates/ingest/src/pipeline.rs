use std::sync::Arc;

use pulsegrid_bus::EventBus;
use pulsegrid_core::{
    DeviceId, Envelope, MetricsRegistry, QuarantineEvent, RejectionReason, TelemetryRecord, TenantId,
};
use pulsegrid_state::{RelationalStore, TimeSeriesStore};

use crate::batch::BatchWriter;
use crate::config::IngestConfig;
use crate::dedup::SeqDedup;
use crate::rate_limiter::RateLimiter;
use crate::validate;

/// The full accept -> validate -> rate-limit -> dedup -> buffer pipeline,
/// shared by the HTTP handler and the MQTT subscriber so both transports
/// feed one pipeline rather than duplicating it per transport.
pub struct IngestPipeline<T, R, B> {
    batch_writer: Arc<BatchWriter<T, R, B>>,
    relational: Arc<R>,
    rate_limiter: RateLimiter,
    dedup: SeqDedup,
    config: IngestConfig,
    metrics: Arc<MetricsRegistry>,
}

impl<T, R, B> IngestPipeline<T, R, B>
where
    T: TimeSeriesStore + 'static,
    R: RelationalStore + 'static,
    B: EventBus + 'static,
{
    #[must_use]
    pub fn new(
        batch_writer: Arc<BatchWriter<T, R, B>>,
        relational: Arc<R>,
        config: IngestConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let rate_limiter = RateLimiter::new(config.rate_limit_tokens_per_sec, config.rate_limit_burst);
        let dedup = SeqDedup::new(config.dedup_window);
        Self { batch_writer, relational, rate_limiter, dedup, config, metrics }
    }

    /// Accept one envelope already bound to an authenticated tenant/device
    /// and topic label. Returns `Ok(())` if accepted, or the rejection
    /// reason (after quarantining the event) otherwise.
    ///
    /// Buffering, not publication, is what "accepted" means here: the
    /// record only reaches the TELEMETRY subject once the batch writer
    /// actually flushes it to the time-series store (`spec.md` §4.2 "after
    /// a successful flush, the pipeline publishes ..."), so a batch that
    /// later fails permanently and is diverted to quarantine never has a
    /// dangling bus event for a record nothing ever stored.
    pub async fn accept(
        &self,
        tenant_id: &TenantId,
        topic: &str,
        envelope: Envelope,
        raw_payload: &serde_json::Value,
    ) -> Result<(), RejectionReason> {
        if let Err(reason) = validate::validate_envelope(&envelope, &self.config) {
            self.reject(tenant_id, topic, &envelope, raw_payload, reason.clone()).await;
            return Err(reason);
        }

        if !self.rate_limiter.try_acquire(tenant_id, &envelope.device_id) {
            let reason = RejectionReason::RateLimited;
            self.reject(tenant_id, topic, &envelope, raw_payload, reason.clone()).await;
            self.metrics.incr_counter(
                "ingest_messages_total",
                &[("tenant", tenant_id.as_str()), ("result", "rate_limited")],
            );
            return Err(reason);
        }

        if let Some(seq) = envelope.seq
            && self.dedup.check_and_insert(tenant_id, &envelope.device_id, seq).await
        {
            let reason = RejectionReason::DuplicateSeq { seq };
            self.reject(tenant_id, topic, &envelope, raw_payload, reason.clone()).await;
            return Err(reason);
        }

        let record = TelemetryRecord::from_envelope(tenant_id.clone(), None, &envelope);
        self.batch_writer.push(record).await;

        self.metrics.incr_counter(
            "ingest_messages_total",
            &[("tenant", tenant_id.as_str()), ("result", "accepted")],
        );

        Ok(())
    }

    async fn reject(
        &self,
        tenant_id: &TenantId,
        topic: &str,
        envelope: &Envelope,
        raw_payload: &serde_json::Value,
        reason: RejectionReason,
    ) {
        self.record_rejection(tenant_id, topic, &envelope.device_id, raw_payload, reason).await;
    }

    /// Record a rejected ingest event for a failure that happened before an
    /// `Envelope` could even be parsed -- missing/invalid credentials, a
    /// topic/path device mismatch, oversized payload, or malformed JSON.
    /// Every rejected ingest gets a `QuarantineEvent` regardless of which
    /// transport or pipeline stage rejected it (`spec.md` §3/§7); callers
    /// that only have a claimed tenant/device (not yet an authenticated
    /// one) still pass it through so the reject is never silently dropped.
    pub async fn record_rejection(
        &self,
        tenant_id: &TenantId,
        topic: &str,
        device_id: &DeviceId,
        raw_payload: &serde_json::Value,
        reason: RejectionReason,
    ) {
        self.metrics.incr_counter(
            "ingest_messages_total",
            &[("tenant", tenant_id.as_str()), ("result", reason.code().as_str())],
        );
        let event = QuarantineEvent::new(
            tenant_id.clone(),
            device_id.clone(),
            topic.to_owned(),
            reason,
            raw_payload.clone(),
        );
        if let Err(err) = self.relational.insert_quarantine_event(&event).await {
            tracing::error!(tenant_id = %tenant_id, error = %err, "failed to record quarantine event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsegrid_bus::MemoryEventBus;
    use pulsegrid_core::MetricValue;
    use pulsegrid_state_memory::{MemoryRelationalStore, MemoryTimeSeriesStore};

    fn pipeline() -> IngestPipeline<MemoryTimeSeriesStore, MemoryRelationalStore, MemoryEventBus> {
        let timeseries = Arc::new(MemoryTimeSeriesStore::new());
        let relational = Arc::new(MemoryRelationalStore::new());
        let bus = Arc::new(MemoryEventBus::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let batch_writer = Arc::new(BatchWriter::new(
            timeseries,
            relational.clone(),
            bus,
            IngestConfig::default(),
            metrics.clone(),
        ));
        IngestPipeline::new(batch_writer, relational, IngestConfig::default(), metrics)
    }

    #[tokio::test]
    async fn accepts_well_formed_envelope() {
        let pipeline = pipeline();
        let tenant = TenantId::new("t1");
        let envelope = Envelope::new("d1", chrono::Utc::now().timestamp() as f64)
            .with_metric("temp_c", MetricValue::Number(22.5));
        let result = pipeline.accept(&tenant, "telemetry/t1/d1", envelope, &serde_json::json!({})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn rejects_duplicate_sequence() {
        let pipeline = pipeline();
        let tenant = TenantId::new("t1");
        let envelope = Envelope::new("d1", chrono::Utc::now().timestamp() as f64).with_seq(7);
        pipeline
            .accept(&tenant, "telemetry/t1/d1", envelope.clone(), &serde_json::json!({}))
            .await
            .unwrap();
        let result = pipeline.accept(&tenant, "telemetry/t1/d1", envelope, &serde_json::json!({})).await;
        assert_eq!(result.unwrap_err().code(), "duplicate_seq");
    }

    #[tokio::test]
    async fn rejects_past_rate_limit_burst() {
        let pipeline = pipeline();
        let tenant = TenantId::new("t1");
        for i in 0..20 {
            let envelope = Envelope::new("d1", chrono::Utc::now().timestamp() as f64).with_seq(i);
            pipeline
                .accept(&tenant, "telemetry/t1/d1", envelope, &serde_json::json!({}))
                .await
                .unwrap();
        }
        let envelope = Envelope::new("d1", chrono::Utc::now().timestamp() as f64).with_seq(999);
        let result = pipeline.accept(&tenant, "telemetry/t1/d1", envelope, &serde_json::json!({})).await;
        assert_eq!(result.unwrap_err().code(), "rate_limited");
    }
}
