use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use pulsegrid_bus::EventBus;
use pulsegrid_core::{QuarantineEvent, RejectionReason, TelemetryRecord, TenantId};
use pulsegrid_state::{RelationalStore, TimeSeriesStore};
use tokio::sync::{watch, Mutex};

use crate::config::IngestConfig;

struct TenantBatch {
    records: Vec<TelemetryRecord>,
    opened_at: Instant,
}

impl TenantBatch {
    fn new() -> Self {
        Self { records: Vec::new(), opened_at: Instant::now() }
    }
}

/// Buffers accepted telemetry records per tenant and flushes each buffer
/// once it reaches `batch_max_records` or `batch_max_age`, whichever comes
/// first. Each flush is one `insert_batch` call per tenant
/// (the store itself runs it in a single transaction via `with_tenant`).
///
/// On a flush that keeps failing past `max_flush_attempts`, the batch is
/// written to quarantine with reason `persistence_failed` instead of being
/// retried forever.
///
/// Once (and only once) a flush succeeds, one message per record is
/// published on the TELEMETRY subject (`spec.md` §4.2) -- this is the sole
/// place that happens, so a record can never be observed on the bus before
/// it exists in the time-series store.
pub struct BatchWriter<T, R, B> {
    buffers: Mutex<HashMap<TenantId, TenantBatch>>,
    timeseries: Arc<T>,
    relational: Arc<R>,
    bus: Arc<B>,
    config: IngestConfig,
    metrics: Arc<pulsegrid_core::MetricsRegistry>,
    heartbeat_tx: watch::Sender<Instant>,
}

impl<T, R, B> BatchWriter<T, R, B>
where
    T: TimeSeriesStore + 'static,
    R: RelationalStore + 'static,
    B: EventBus + 'static,
{
    #[must_use]
    pub fn new(
        timeseries: Arc<T>,
        relational: Arc<R>,
        bus: Arc<B>,
        config: IngestConfig,
        metrics: Arc<pulsegrid_core::MetricsRegistry>,
    ) -> Self {
        let (heartbeat_tx, _) = watch::channel(Instant::now());
        Self { buffers: Mutex::new(HashMap::new()), timeseries, relational, bus, config, metrics, heartbeat_tx }
    }

    /// A `watch` handle that ticks every time `spawn_age_flusher`'s
    /// background loop runs, used by `/ready` to detect a hung or dead
    /// flusher task rather than relying on the relational/bus checks alone.
    #[must_use]
    pub fn heartbeat(&self) -> watch::Receiver<Instant> {
        self.heartbeat_tx.subscribe()
    }

    /// Buffer one accepted record, flushing its tenant's batch immediately
    /// if this push crosses `batch_max_records`.
    pub async fn push(&self, record: TelemetryRecord) {
        let tenant_id = record.tenant_id.clone();
        let should_flush = {
            let mut buffers = self.buffers.lock().await;
            let batch = buffers.entry(tenant_id.clone()).or_insert_with(TenantBatch::new);
            batch.records.push(record);
            batch.records.len() >= self.config.batch_max_records
        };
        if should_flush {
            self.flush_tenant(&tenant_id).await;
        }
    }

    /// Flush every tenant batch whose age has crossed `batch_max_age`.
    /// Intended to be called on a periodic ticker alongside `push`.
    pub async fn flush_aged(&self) {
        let aged: Vec<TenantId> = {
            let buffers = self.buffers.lock().await;
            buffers
                .iter()
                .filter(|(_, batch)| {
                    !batch.records.is_empty() && batch.opened_at.elapsed() >= self.config.batch_max_age
                })
                .map(|(tenant_id, _)| tenant_id.clone())
                .collect()
        };
        for tenant_id in aged {
            self.flush_tenant(&tenant_id).await;
        }
    }

    /// Flush every remaining buffer regardless of size/age, used on
    /// shutdown to drain the queue before exit.
    pub async fn flush_all(&self) {
        let tenants: Vec<TenantId> = self.buffers.lock().await.keys().cloned().collect();
        for tenant_id in tenants {
            self.flush_tenant(&tenant_id).await;
        }
    }

    async fn flush_tenant(&self, tenant_id: &TenantId) {
        let records = {
            let mut buffers = self.buffers.lock().await;
            match buffers.get_mut(tenant_id) {
                Some(batch) if !batch.records.is_empty() => {
                    std::mem::replace(batch, TenantBatch::new()).records
                }
                _ => return,
            }
        };

        let started = Instant::now();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.timeseries.insert_batch(tenant_id, &records).await {
                Ok(()) => {
                    self.metrics.observe_seconds(
                        "ingest_batch_write_seconds",
                        &[("tenant", tenant_id.as_str())],
                        started.elapsed().as_secs_f64(),
                    );
                    self.publish_flushed(tenant_id, &records).await;
                    return;
                }
                Err(err) if attempt < self.config.max_flush_attempts => {
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        attempt,
                        error = %err,
                        "batch flush failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
                }
                Err(err) => {
                    tracing::error!(
                        tenant_id = %tenant_id,
                        error = %err,
                        records = records.len(),
                        "batch flush failed permanently, quarantining"
                    );
                    self.quarantine_batch(tenant_id, &records, &err.to_string()).await;
                    return;
                }
            }
        }
    }

    /// Publish one TELEMETRY event per record in a batch that was just
    /// successfully flushed. Best-effort: a publish failure is counted but
    /// does not roll back the flush (the store already holds the truth).
    async fn publish_flushed(&self, tenant_id: &TenantId, records: &[TelemetryRecord]) {
        for record in records {
            let subject = pulsegrid_bus::subject::telemetry(tenant_id.as_str(), record.device_id.as_str());
            let payload = match serde_json::to_vec(record) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::error!(tenant_id = %tenant_id, error = %err, "failed to serialize telemetry record for bus publish");
                    continue;
                }
            };
            if let Err(err) = self.bus.publish(&subject, Bytes::from(payload)).await {
                tracing::warn!(tenant_id = %tenant_id, subject = %subject, error = %err, "telemetry publish failed (best-effort)");
                self.metrics.incr_counter(
                    "ingest_messages_total",
                    &[("tenant", tenant_id.as_str()), ("result", "publish_failed")],
                );
            }
        }
    }

    async fn quarantine_batch(&self, tenant_id: &TenantId, records: &[TelemetryRecord], detail: &str) {
        for record in records {
            let event = QuarantineEvent::new(
                tenant_id.clone(),
                record.device_id.clone(),
                String::new(),
                RejectionReason::PersistenceFailed { detail: detail.to_owned() },
                serde_json::to_value(record).unwrap_or(serde_json::Value::Null),
            );
            if let Err(err) = self.relational.insert_quarantine_event(&event).await {
                tracing::error!(tenant_id = %tenant_id, error = %err, "failed to quarantine record after flush failure");
            }
        }
    }
}

/// A handle used by the ingest pipeline to push records without holding a
/// reference to the writer's generic parameters, paired with a background
/// task draining `flush_aged` on a ticker.
pub fn spawn_age_flusher<T, R, B>(
    writer: Arc<BatchWriter<T, R, B>>,
    interval: Duration,
    shutdown: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()>
where
    T: TimeSeriesStore + 'static,
    R: RelationalStore + 'static,
    B: EventBus + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    writer.flush_aged().await;
                    writer.heartbeat_tx.send_replace(Instant::now());
                }
                () = shutdown.cancelled() => {
                    writer.flush_all().await;
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsegrid_bus::MemoryEventBus;
    use pulsegrid_core::{Envelope, MetricValue};
    use pulsegrid_state_memory::{MemoryRelationalStore, MemoryTimeSeriesStore};

    fn record(tenant: &str, device: &str) -> TelemetryRecord {
        let envelope = Envelope::new(device, 1_700_000_000.0)
            .with_metric("temp_c", MetricValue::Number(20.0));
        TelemetryRecord::from_envelope(TenantId::new(tenant), None, &envelope)
    }

    #[tokio::test]
    async fn flushes_when_batch_size_reached() {
        let timeseries = Arc::new(MemoryTimeSeriesStore::new());
        let relational = Arc::new(MemoryRelationalStore::new());
        let mut config = IngestConfig::default();
        config.batch_max_records = 2;
        let writer = BatchWriter::new(
            timeseries.clone(),
            relational,
            Arc::new(MemoryEventBus::new()),
            config,
            Arc::new(pulsegrid_core::MetricsRegistry::new()),
        );

        writer.push(record("t1", "d1")).await;
        writer.push(record("t1", "d2")).await;

        let rollup = timeseries
            .latest_rollup(&TenantId::new("t1"), chrono::Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(rollup.len(), 2);
    }

    #[tokio::test]
    async fn flush_all_drains_partial_batch() {
        let timeseries = Arc::new(MemoryTimeSeriesStore::new());
        let relational = Arc::new(MemoryRelationalStore::new());
        let writer = BatchWriter::new(
            timeseries.clone(),
            relational,
            Arc::new(MemoryEventBus::new()),
            IngestConfig::default(),
            Arc::new(pulsegrid_core::MetricsRegistry::new()),
        );

        writer.push(record("t1", "d1")).await;
        writer.flush_all().await;

        let rollup = timeseries
            .latest_rollup(&TenantId::new("t1"), chrono::Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(rollup.len(), 1);
    }

    #[tokio::test]
    async fn publishes_telemetry_event_only_after_flush_succeeds() {
        let timeseries = Arc::new(MemoryTimeSeriesStore::new());
        let relational = Arc::new(MemoryRelationalStore::new());
        let bus = Arc::new(MemoryEventBus::new());
        let mut consumer = bus
            .subscribe(&pulsegrid_bus::subject::telemetry("t1", "d1"), "test-consumer", pulsegrid_bus::ConsumeOptions::default())
            .await
            .unwrap();
        let writer = BatchWriter::new(
            timeseries,
            relational,
            bus,
            IngestConfig::default(),
            Arc::new(pulsegrid_core::MetricsRegistry::new()),
        );

        writer.push(record("t1", "d1")).await;
        assert!(
            tokio::time::timeout(Duration::from_millis(20), consumer.next()).await.is_err(),
            "no event should be published before the batch flushes"
        );

        writer.flush_all().await;
        let delivery = tokio::time::timeout(Duration::from_millis(200), consumer.next())
            .await
            .expect("timed out waiting for post-flush publish")
            .unwrap()
            .expect("delivery should be present");
        delivery.ack();
    }
}
