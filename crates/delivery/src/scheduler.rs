use std::sync::Arc;

use bytes::Bytes;
use pulsegrid_bus::EventBus;
use pulsegrid_state::RelationalStore;

use crate::config::DeliveryConfig;

/// The other half of the ack-and-schedule retry strategy: poll the store
/// for jobs whose `next_attempt_at` has elapsed and republish them onto
/// ROUTES so the delivery worker picks them up again. Runs independently
/// of the worker so a quiet worker (no live ROUTES traffic) doesn't stall
/// retries.
pub async fn run_retry_scheduler<R, B>(store: Arc<R>, bus: Arc<B>, config: DeliveryConfig, shutdown: tokio_util::sync::CancellationToken)
where
    R: RelationalStore + 'static,
    B: EventBus + 'static,
{
    let mut ticker = tokio::time::interval(config.scheduler_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = republish_due_jobs(store.as_ref(), bus.as_ref(), &config).await {
                    tracing::error!(error = %err, "retry scheduler tick failed, retrying next interval");
                }
            }
            () = shutdown.cancelled() => {
                tracing::info!("retry scheduler shutting down");
                return;
            }
        }
    }
}

async fn republish_due_jobs<R, B>(store: &R, bus: &B, config: &DeliveryConfig) -> Result<(), crate::error::DeliveryError>
where
    R: RelationalStore,
    B: EventBus,
{
    let now = chrono::Utc::now();
    let due = store.jobs_due_for_retry(now, config.scheduler_batch_size).await?;
    for job in &due {
        let subject = pulsegrid_bus::subject::routes(job.tenant_id.as_str());
        match serde_json::to_vec(job) {
            Ok(bytes) => {
                if let Err(err) = bus.publish(&subject, Bytes::from(bytes)).await {
                    tracing::warn!(tenant_id = %job.tenant_id, job_id = %job.job_id, error = %err, "failed to republish due retry job");
                }
            }
            Err(err) => tracing::error!(job_id = %job.job_id, error = %err, "failed to serialize retry job"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pulsegrid_bus::MemoryEventBus;
    use pulsegrid_core::{AlertDetails, AlertLifecycleEvent, AlertType, Confidence, DeviceId, NotificationJob, TenantId};
    use pulsegrid_state::relational::AlertUpsertFields;
    use pulsegrid_state_memory::MemoryRelationalStore;

    use super::*;

    #[tokio::test]
    async fn republishes_only_jobs_whose_retry_time_has_passed() {
        let store = Arc::new(MemoryRelationalStore::new());
        let bus = Arc::new(MemoryEventBus::new());
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
                },
            )
            .await
            .unwrap();
        let alert_id = outcome.alert().alert_id.clone();

        let job = NotificationJob::new(tenant.clone(), "job-1", alert_id, "chan-1", AlertLifecycleEvent::Opened);
        store.insert_job_if_absent(job.clone()).await.unwrap();
        store.claim_job(&tenant, &job.job_id).await.unwrap();
        store
            .reschedule_job(&tenant, &job.job_id, "timeout", chrono::Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();

        let config = DeliveryConfig { scheduler_interval: Duration::from_secs(5), ..DeliveryConfig::default() };
        republish_due_jobs(store.as_ref(), bus.as_ref(), &config).await.unwrap();

        let mut consumer = bus.subscribe("routes.*", "test", pulsegrid_bus::ConsumeOptions::default()).await.unwrap();
        let delivery = consumer.next().await.unwrap().expect("republished job should be on the bus");
        let republished: NotificationJob = serde_json::from_slice(&delivery.payload).unwrap();
        assert_eq!(republished.job_id, job.job_id);
        delivery.ack();
    }
}
