use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pulsegrid_core::{AlertRule, DeviceId, SiteId, TelemetryRecord, TenantId};
use pulsegrid_state::types::{DeviceRollup, WindowSampleCounts};
use pulsegrid_state::{StateError, TimeSeriesStore};

/// An in-memory [`TimeSeriesStore`], append-only per `(tenant, device)`
/// behind a `Mutex`-guarded `Vec` (telemetry volume in tests is small; a
/// real deployment's bottleneck is the `PostgreSQL` backend's indexes, not
/// this one).
#[derive(Default)]
pub struct MemoryTimeSeriesStore {
    records: DashMap<(TenantId, DeviceId), Mutex<Vec<TelemetryRecord>>>,
}

impl MemoryTimeSeriesStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryTimeSeriesStore {
    async fn insert_batch(
        &self,
        tenant_id: &TenantId,
        records: &[TelemetryRecord],
    ) -> Result<(), StateError> {
        for record in records {
            let key = (tenant_id.clone(), record.device_id.clone());
            let entry = self.records.entry(key).or_default();
            entry.lock().expect("timeseries mutex poisoned").push(record.clone());
        }
        Ok(())
    }

    async fn latest_rollup(
        &self,
        tenant_id: &TenantId,
        since: DateTime<Utc>,
    ) -> Result<Vec<DeviceRollup>, StateError> {
        let mut out = Vec::new();
        for entry in &self.records {
            let (tid, device_id) = entry.key();
            if tid != tenant_id {
                continue;
            }
            let records = entry.value().lock().expect("timeseries mutex poisoned");
            let Some(latest) = records.iter().filter(|r| r.time >= since).max_by_key(|r| r.time)
            else {
                continue;
            };
            out.push(DeviceRollup {
                device_id: device_id.clone(),
                site_id: latest.site_id.clone(),
                metrics: latest
                    .metrics
                    .iter()
                    .filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f)))
                    .collect(),
                last_seen_at: Some(latest.time),
            });
        }
        Ok(out)
    }

    async fn window_sample_counts(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
        rule: &AlertRule,
        now: DateTime<Utc>,
    ) -> Result<WindowSampleCounts, StateError> {
        let key = (tenant_id.clone(), device_id.clone());
        let Some(records) = self.records.get(&key) else {
            return Ok(WindowSampleCounts::default());
        };
        let records = records.lock().expect("timeseries mutex poisoned");
        let window_start = now - chrono::Duration::seconds(rule.duration_seconds as i64);
        let mut total = 0u64;
        let mut breaching = 0u64;
        for record in records.iter().filter(|r| r.time >= window_start && r.time <= now) {
            let Some(value) = record.metric(&rule.metric_name) else {
                continue;
            };
            total += 1;
            if rule.operator.evaluate(value, rule.threshold) {
                breaching += 1;
            }
        }
        Ok(WindowSampleCounts { total, breaching })
    }

    async fn bucketed_average(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
        _site_id: Option<&SiteId>,
        metric_name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        bucket_seconds: i64,
    ) -> Result<Vec<(DateTime<Utc>, f64)>, StateError> {
        let key = (tenant_id.clone(), device_id.clone());
        let Some(records) = self.records.get(&key) else {
            return Ok(Vec::new());
        };
        let records = records.lock().expect("timeseries mutex poisoned");
        let mut buckets: std::collections::BTreeMap<i64, (f64, u64)> =
            std::collections::BTreeMap::new();
        for record in records.iter().filter(|r| r.time >= from && r.time <= to) {
            let Some(value) = record.metric(metric_name) else {
                continue;
            };
            let bucket = record.time.timestamp() / bucket_seconds;
            let entry = buckets.entry(bucket).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
        Ok(buckets
            .into_iter()
            .map(|(bucket, (sum, count))| {
                let ts = DateTime::from_timestamp(bucket * bucket_seconds, 0).unwrap_or(from);
                (ts, sum / count as f64)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsegrid_core::{Envelope, MetricValue, ThresholdOperator};

    fn record(device: &str, ts: i64, temp: f64) -> TelemetryRecord {
        let envelope = Envelope::new(device, ts as f64).with_metric("temp_c", MetricValue::Number(temp));
        TelemetryRecord::from_envelope(TenantId::new("t1"), None, &envelope)
    }

    #[tokio::test]
    async fn rollup_returns_latest_sample() {
        let store = MemoryTimeSeriesStore::new();
        let tenant = TenantId::new("t1");
        store
            .insert_batch(&tenant, &[record("d1", 1_700_000_000, 20.0), record("d1", 1_700_000_060, 25.0)])
            .await
            .unwrap();

        let rollup = store
            .latest_rollup(&tenant, DateTime::from_timestamp(1_699_999_000, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(rollup.len(), 1);
        assert_eq!(rollup[0].metrics.get("temp_c"), Some(&25.0));
    }

    #[tokio::test]
    async fn window_counts_require_every_sample_breaching() {
        let store = MemoryTimeSeriesStore::new();
        let tenant = TenantId::new("t1");
        store
            .insert_batch(
                &tenant,
                &[
                    record("d2", 1_700_000_000, 15.0),
                    record("d2", 1_700_000_100, 18.0),
                    record("d2", 1_700_000_200, 25.0),
                ],
            )
            .await
            .unwrap();

        let rule = AlertRule::new("t1", "r2", "low battery", "temp_c", ThresholdOperator::Lt, 20.0)
            .with_duration_seconds(300);
        let now = DateTime::from_timestamp(1_700_000_250, 0).unwrap();
        let counts = store
            .window_sample_counts(&tenant, &DeviceId::new("d2"), &rule, now)
            .await
            .unwrap();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.breaching, 2);
        assert!(!counts.all_breaching());
    }
}
