use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulsegrid_core::{AlertRule, DeviceId, MetricValue, SiteId, TelemetryRecord, TenantId};
use pulsegrid_state::types::{DeviceRollup, WindowSampleCounts};
use pulsegrid_state::{StateError, TimeSeriesStore};
use pulsegrid_tenancy::TenantIsolation;
use sqlx::Row;
use sqlx::types::Json;

/// `PostgreSQL`-backed [`TimeSeriesStore`]. `insert_batch` is the sole bulk
/// write path into the `telemetry` table; everything else reads it back.
///
/// Metrics are stored as a single `JSONB` object per row rather than one
/// column per metric, since the metric set is open-ended (device templates
/// vary). Windowed aggregation therefore filters rows by time range in SQL
/// and extracts/combines the named metric in Rust, the same shape the
/// in-memory store uses.
pub struct PostgresTimeSeriesStore {
    isolation: TenantIsolation,
}

impl PostgresTimeSeriesStore {
    #[must_use]
    pub fn new(isolation: TenantIsolation) -> Self {
        Self { isolation }
    }
}

fn tenancy_err(err: pulsegrid_tenancy::TenancyError) -> StateError {
    StateError::Backend(err.to_string())
}

#[async_trait]
impl TimeSeriesStore for PostgresTimeSeriesStore {
    async fn insert_batch(
        &self,
        tenant_id: &TenantId,
        records: &[TelemetryRecord],
    ) -> Result<(), StateError> {
        let records = records.to_vec();
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    for record in &records {
                        sqlx::query(
                            "INSERT INTO telemetry (time, tenant_id, device_id, site_id, seq, metrics, envelope_version)
                             VALUES ($1, current_setting('app.tenant_id', true), $2, $3, $4, $5, $6)",
                        )
                        .bind(record.time)
                        .bind(record.device_id.as_str())
                        .bind(record.site_id.as_ref().map(SiteId::as_str))
                        .bind(record.seq.map(|s| s as i64))
                        .bind(Json(&record.metrics))
                        .bind(String::from(record.envelope_version.clone()))
                        .execute(&mut *conn)
                        .await
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    }
                    Ok(())
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn latest_rollup(
        &self,
        tenant_id: &TenantId,
        since: DateTime<Utc>,
    ) -> Result<Vec<DeviceRollup>, StateError> {
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    let rows = sqlx::query(
                        "SELECT DISTINCT ON (device_id) device_id, site_id, metrics, time
                         FROM telemetry
                         WHERE tenant_id = current_setting('app.tenant_id', true) AND time >= $1
                         ORDER BY device_id, time DESC",
                    )
                    .bind(since)
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;

                    rows.iter()
                        .map(|row| {
                            let device_id: String = row
                                .try_get("device_id")
                                .map_err(|e| StateError::Backend(e.to_string()))?;
                            let site_id: Option<String> = row
                                .try_get("site_id")
                                .map_err(|e| StateError::Backend(e.to_string()))?;
                            let metrics: Json<HashMap<String, MetricValue>> = row
                                .try_get("metrics")
                                .map_err(|e| StateError::Backend(e.to_string()))?;
                            let time: DateTime<Utc> =
                                row.try_get("time").map_err(|e| StateError::Backend(e.to_string()))?;
                            Ok(DeviceRollup {
                                device_id: DeviceId::new(device_id),
                                site_id: site_id.map(SiteId::new),
                                metrics: metrics
                                    .0
                                    .iter()
                                    .filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f)))
                                    .collect(),
                                last_seen_at: Some(time),
                            })
                        })
                        .collect::<Result<Vec<_>, StateError>>()
                        .map_err(|e: StateError| pulsegrid_tenancy::TenancyError::Action(e.to_string()))
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn window_sample_counts(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
        rule: &AlertRule,
        now: DateTime<Utc>,
    ) -> Result<WindowSampleCounts, StateError> {
        let device_id = device_id.clone();
        let rule = rule.clone();
        let window_start = now - chrono::Duration::seconds(rule.duration_seconds as i64);
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    let rows = sqlx::query(
                        "SELECT metrics FROM telemetry
                         WHERE tenant_id = current_setting('app.tenant_id', true)
                           AND device_id = $1 AND time >= $2 AND time <= $3",
                    )
                    .bind(device_id.as_str())
                    .bind(window_start)
                    .bind(now)
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;

                    let mut total = 0u64;
                    let mut breaching = 0u64;
                    for row in &rows {
                        let metrics: Json<HashMap<String, MetricValue>> = row
                            .try_get("metrics")
                            .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                        let Some(value) = metrics.0.get(&rule.metric_name).and_then(MetricValue::as_f64)
                        else {
                            continue;
                        };
                        total += 1;
                        if rule.operator.evaluate(value, rule.threshold) {
                            breaching += 1;
                        }
                    }
                    Ok(WindowSampleCounts { total, breaching })
                })
            })
            .await
            .map_err(tenancy_err)
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
        let device_id = device_id.clone();
        let metric_name = metric_name.to_owned();
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    let rows = sqlx::query(
                        "SELECT time, metrics FROM telemetry
                         WHERE tenant_id = current_setting('app.tenant_id', true)
                           AND device_id = $1 AND time >= $2 AND time <= $3
                         ORDER BY time ASC",
                    )
                    .bind(device_id.as_str())
                    .bind(from)
                    .bind(to)
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;

                    let mut buckets: std::collections::BTreeMap<i64, (f64, u64)> =
                        std::collections::BTreeMap::new();
                    for row in &rows {
                        let time: DateTime<Utc> = row
                            .try_get("time")
                            .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                        let metrics: Json<HashMap<String, MetricValue>> = row
                            .try_get("metrics")
                            .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                        let Some(value) = metrics.0.get(&metric_name).and_then(MetricValue::as_f64) else {
                            continue;
                        };
                        let bucket = time.timestamp() / bucket_seconds;
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
                })
            })
            .await
            .map_err(tenancy_err)
    }
}
