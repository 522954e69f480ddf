use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulsegrid_core::{AlertRule, DeviceId, SiteId, TelemetryRecord, TenantId};

use crate::error::StateError;
use crate::types::{DeviceRollup, WindowSampleCounts};

/// The time-series system of record for telemetry.
///
/// The sole bulk write path is [`TimeSeriesStore::insert_batch`], called by
/// the ingest pipeline's batch writer; no other component writes telemetry
/// rows directly.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Bulk-insert accepted telemetry records for one tenant. A flush is
    /// one transaction per tenant.
    async fn insert_batch(
        &self,
        tenant_id: &TenantId,
        records: &[TelemetryRecord],
    ) -> Result<(), StateError>;

    /// The latest metrics and heartbeat time for every device in a tenant
    /// that has reported within `since`, used by the evaluator's per-tick
    /// rollup fetch.
    async fn latest_rollup(
        &self,
        tenant_id: &TenantId,
        since: DateTime<Utc>,
    ) -> Result<Vec<DeviceRollup>, StateError>;

    /// Sample counts for a windowed rule evaluation: how many samples of
    /// `rule.metric_name` exist for `device_id` within
    /// `rule.duration_seconds` of `now`, and how many of those breach the
    /// rule's predicate.
    async fn window_sample_counts(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
        rule: &AlertRule,
        now: DateTime<Utc>,
    ) -> Result<WindowSampleCounts, StateError>;

    /// Bucketed aggregation for read-back; only bucketed read-back is in
    /// scope, not full OLAP. Returns the average
    /// of `metric_name` per fixed-width bucket within `[from, to]`.
    async fn bucketed_average(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
        site_id: Option<&SiteId>,
        metric_name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        bucket_seconds: i64,
    ) -> Result<Vec<(DateTime<Utc>, f64)>, StateError>;
}
