use std::sync::Arc;
use std::time::Instant;

use pulsegrid_bus::{ConsumeOptions, Delivery, EventBus};
use pulsegrid_core::{DeadLetter, DeliveryOutcome, MetricsRegistry, NotificationAttempt, NotificationJob};
use pulsegrid_state::{JobClaimOutcome, RelationalStore, StateError};

use crate::config::{self, DeliveryConfig};
use crate::dispatch::{self, DispatchClients};

/// Run the delivery worker's ROUTES consumer loop until `shutdown` fires.
///
/// Chosen retry strategy: **ack-and-schedule**. Every job this consumer
/// claims is acked right away, whatever the outcome; retries are driven
/// by [`crate::scheduler`]
/// polling `next_attempt_at` and republishing, not by bus redelivery. This
/// keeps at most one place holding a job's retry timer -- the database
/// row, not an in-flight unacked message.
pub async fn run_delivery_worker<R, B>(
    store: Arc<R>,
    bus: Arc<B>,
    clients: Arc<DispatchClients>,
    config: DeliveryConfig,
    metrics: Arc<MetricsRegistry>,
    shutdown: tokio_util::sync::CancellationToken,
) where
    R: RelationalStore + 'static,
    B: EventBus + 'static,
{
    let mut consumer = match bus.subscribe("routes.*", &config.consumer_group, ConsumeOptions::default()).await {
        Ok(consumer) => consumer,
        Err(err) => {
            tracing::error!(error = %err, "delivery worker failed to subscribe to routes subject");
            return;
        }
    };

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                tracing::info!("delivery worker shutting down");
                return;
            }
            delivery = consumer.next() => {
                match delivery {
                    Ok(Some(delivery)) => handle_delivery(store.as_ref(), clients.as_ref(), &config, &metrics, delivery).await,
                    Ok(None) => {
                        tracing::info!("routes consumer closed");
                        return;
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "error reading from routes consumer");
                    }
                }
            }
        }
    }
}

async fn handle_delivery<R>(store: &R, clients: &DispatchClients, config: &DeliveryConfig, metrics: &MetricsRegistry, delivery: Delivery)
where
    R: RelationalStore,
{
    let job: NotificationJob = match serde_json::from_slice(&delivery.payload) {
        Ok(job) => job,
        Err(err) => {
            tracing::warn!(error = %err, "malformed notification job, dropping");
            delivery.ack();
            return;
        }
    };

    if let Err(err) = process_job(store, clients, config, metrics, &job).await {
        tracing::error!(
            tenant_id = %job.tenant_id,
            job_id = %job.job_id,
            error = %err,
            "delivery processing failed unexpectedly"
        );
    }
    // Acked unconditionally: retries are driven by the scheduler against
    // `next_attempt_at`, not by bus redelivery (see module doc comment).
    delivery.ack();
}

async fn process_job<R>(store: &R, clients: &DispatchClients, config: &DeliveryConfig, metrics: &MetricsRegistry, job: &NotificationJob) -> Result<(), StateError>
where
    R: RelationalStore,
{
    let claimed = match store.claim_job(&job.tenant_id, &job.job_id).await? {
        JobClaimOutcome::Claimed(job) => job,
        JobClaimOutcome::NotClaimable | JobClaimOutcome::NotFound => return Ok(()),
    };

    let Some(channel) = store.get_channel(&claimed.tenant_id, &claimed.channel_id).await? else {
        tracing::warn!(tenant_id = %claimed.tenant_id, channel_id = %claimed.channel_id, "job references unknown channel, failing permanently");
        fail_permanently(store, metrics, &claimed, "unknown", "channel not found").await?;
        return Ok(());
    };
    let Some(alert) = store.get_alert(&claimed.tenant_id, &claimed.alert_id).await? else {
        tracing::warn!(tenant_id = %claimed.tenant_id, alert_id = %claimed.alert_id, "job references unknown alert, failing permanently");
        fail_permanently(store, metrics, &claimed, channel.config.kind(), "alert not found").await?;
        return Ok(());
    };

    let attempt_no = store.next_attempt_no(&claimed.tenant_id, &claimed.job_id).await?;
    let started = Instant::now();
    let outcome = dispatch::dispatch(clients, &channel, &alert, &claimed).await;
    let latency = started.elapsed();
    let channel_kind = channel.config.kind();

    metrics.observe_seconds("delivery_attempt_seconds", &[("channel", channel_kind)], latency.as_secs_f64());

    let mut attempt = match &outcome {
        DeliveryOutcome::Success { .. } => NotificationAttempt::success(claimed.job_id.clone(), attempt_no, latency),
        DeliveryOutcome::Retryable { error, .. } | DeliveryOutcome::Permanent { error, .. } => {
            NotificationAttempt::failure(claimed.job_id.clone(), attempt_no, latency, None, error.clone())
        }
    };
    if let DeliveryOutcome::Success { transport_status } | DeliveryOutcome::Retryable { transport_status, .. } | DeliveryOutcome::Permanent { transport_status, .. } = &outcome {
        attempt.transport_status = transport_status.clone();
    }
    store.record_attempt(&attempt).await?;

    match outcome {
        DeliveryOutcome::Success { .. } => {
            store.mark_job_completed(&claimed.tenant_id, &claimed.job_id).await?;
            metrics.incr_counter("delivery_jobs_completed_total", &[("tenant", claimed.tenant_id.as_str()), ("channel", channel_kind)]);
        }
        DeliveryOutcome::Retryable { error, .. } if claimed.attempts + 1 < config.max_attempts => {
            let backoff = config::backoff_for_attempt(config, claimed.attempts + 1);
            let next_attempt_at = chrono::Utc::now() + chrono::Duration::from_std(backoff).unwrap_or_default();
            store.reschedule_job(&claimed.tenant_id, &claimed.job_id, &error, next_attempt_at).await?;
            metrics.incr_counter("delivery_jobs_rescheduled_total", &[("tenant", claimed.tenant_id.as_str()), ("channel", channel_kind)]);
        }
        DeliveryOutcome::Retryable { error, .. } | DeliveryOutcome::Permanent { error, .. } => {
            fail_permanently(store, metrics, &claimed, channel_kind, &error).await?;
        }
    }

    Ok(())
}

async fn fail_permanently<R: RelationalStore>(store: &R, metrics: &MetricsRegistry, job: &NotificationJob, channel_kind: &str, error: &str) -> Result<(), StateError> {
    let failed = store.mark_job_failed(&job.tenant_id, &job.job_id, error).await?;
    let dead_letter = DeadLetter::new(
        failed.tenant_id.clone(),
        failed.job_id.clone(),
        failed.alert_id.clone(),
        failed.channel_id.clone(),
        failed.attempts,
        error,
    );
    store.insert_dead_letter(&dead_letter).await?;
    metrics.incr_counter("delivery_jobs_failed_total", &[("tenant", failed.tenant_id.as_str())]);
    metrics.incr_counter("delivery_dlq_total", &[("channel", channel_kind)]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use pulsegrid_core::{
        AlertDetails, AlertLifecycleEvent, AlertType, ChannelConfig, Confidence, DeviceId, JobStatus, NotificationChannel,
        TenantId,
    };
    use pulsegrid_state::relational::AlertUpsertFields;
    use pulsegrid_state::JobInsertOutcome;
    use pulsegrid_state_memory::MemoryRelationalStore;

    use super::*;

    fn clients() -> DispatchClients {
        DispatchClients {
            http: reqwest::Client::new(),
            smtp: None,
            smtp_from_address: "alerts@pulsegrid.example".to_owned(),
            mqtt: None,
        }
    }

    async fn seed_alert_and_channel(store: &MemoryRelationalStore, tenant: &TenantId) -> (pulsegrid_core::AlertId, pulsegrid_core::ChannelId) {
        let outcome = store
            .open_or_update_alert(
                tenant,
                "RULE:r1:d1",
                AlertType::Threshold,
                AlertUpsertFields {
                    device_id: DeviceId::new("d1"),
                    site_id: None,
                    severity: 3,
                    confidence: Confidence::CERTAIN,
                    summary: "hot".into(),
                    details: AlertDetails::default(),
                    initial_next_escalation_at: None,
                },
            )
            .await
            .unwrap();
        let alert_id = outcome.alert().alert_id.clone();

        let channel = NotificationChannel {
            tenant_id: tenant.clone(),
            channel_id: "chan-1".into(),
            config: ChannelConfig::Email { to_address: "ops@example.com".into() },
            is_enabled: true,
        };
        store.seed_channel(channel);
        (alert_id, "chan-1".into())
    }

    #[tokio::test]
    async fn unknown_channel_fails_the_job_permanently() {
        let store = MemoryRelationalStore::new();
        let tenant = TenantId::new("t1");
        let job = NotificationJob::new(tenant.clone(), "job-1", "alert-missing", "chan-missing", AlertLifecycleEvent::Opened);
        assert!(matches!(store.insert_job_if_absent(job.clone()).await.unwrap(), JobInsertOutcome::Inserted(_)));

        let config = DeliveryConfig::default();
        let metrics = MetricsRegistry::new();
        process_job(&store, &clients(), &config, &metrics, &job).await.unwrap();

        let stored = store.get_job(&tenant, &job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn missing_smtp_transport_fails_permanently_without_panicking() {
        let store = MemoryRelationalStore::new();
        let tenant = TenantId::new("t1");
        let (alert_id, channel_id) = seed_alert_and_channel(&store, &tenant).await;
        let job = NotificationJob::new(tenant.clone(), "job-1", alert_id, channel_id, AlertLifecycleEvent::Opened);
        store.insert_job_if_absent(job.clone()).await.unwrap();

        let config = DeliveryConfig::default();
        let metrics = MetricsRegistry::new();
        process_job(&store, &clients(), &config, &metrics, &job).await.unwrap();

        let stored = store.get_job(&tenant, &job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn retryable_dispatch_error_reschedules_instead_of_failing() {
        // A webhook channel pointed at a closed local port fails fast with a
        // connection error, which is retryable; with attempts=0 this should
        // land back in PENDING with attempts incremented, not FAILED.
        let store = MemoryRelationalStore::new();
        let tenant = TenantId::new("t1");
        let outcome = store
            .open_or_update_alert(
                &tenant,
                "RULE:r1:d1",
                AlertType::Threshold,
                AlertUpsertFields {
                    device_id: DeviceId::new("d1"),
                    site_id: None,
                    severity: 3,
                    confidence: Confidence::CERTAIN,
                    summary: "hot".into(),
                    details: AlertDetails::default(),
                    initial_next_escalation_at: None,
                },
            )
            .await
            .unwrap();
        let alert_id = outcome.alert().alert_id.clone();
        store.seed_channel(NotificationChannel {
            tenant_id: tenant.clone(),
            channel_id: "chan-1".into(),
            config: ChannelConfig::Webhook {
                url: "http://127.0.0.1:1/unreachable".into(),
                signing_secret: "secret".into(),
                headers: Default::default(),
            },
            is_enabled: true,
        });
        let job = NotificationJob::new(tenant.clone(), "job-1", alert_id, "chan-1", AlertLifecycleEvent::Opened);
        store.insert_job_if_absent(job.clone()).await.unwrap();

        let config = DeliveryConfig::default();
        let metrics = MetricsRegistry::new();
        process_job(&store, &clients(), &config, &metrics, &job).await.unwrap();

        let stored = store.get_job(&tenant, &job.job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.attempts, 1);
        assert!(stored.next_attempt_at.is_some());
    }
}
