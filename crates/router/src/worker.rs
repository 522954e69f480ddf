use std::sync::Arc;

use bytes::Bytes;
use pulsegrid_bus::{ConsumeOptions, EventBus};
use pulsegrid_core::AlertEvent;
use pulsegrid_state::RelationalStore;

use crate::config::RouterConfig;
use crate::route;

/// Run the router's ALERTS consumer loop until `shutdown` fires.
///
/// Failure semantics: a malformed event payload is logged and acked
/// (redelivery cannot fix a parse error); a store failure while routing is
/// logged and the message is **not** acked, so bus redelivery retries it.
pub async fn run_router<R, B>(
    store: Arc<R>,
    bus: Arc<B>,
    config: RouterConfig,
    shutdown: tokio_util::sync::CancellationToken,
) where
    R: RelationalStore + 'static,
    B: EventBus + 'static,
{
    let mut consumer = match bus.subscribe("alerts.*", &config.consumer_group, ConsumeOptions::default()).await {
        Ok(consumer) => consumer,
        Err(err) => {
            tracing::error!(error = %err, "router failed to subscribe to alerts subject");
            return;
        }
    };

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                tracing::info!("router shutting down");
                return;
            }
            delivery = consumer.next() => {
                match delivery {
                    Ok(Some(delivery)) => handle_delivery(store.as_ref(), bus.as_ref(), delivery).await,
                    Ok(None) => {
                        tracing::info!("alerts consumer closed");
                        return;
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "error reading from alerts consumer");
                    }
                }
            }
        }
    }
}

async fn handle_delivery<R, B>(store: &R, bus: &B, delivery: pulsegrid_bus::Delivery)
where
    R: RelationalStore,
    B: EventBus,
{
    let event: AlertEvent = match serde_json::from_slice(&delivery.payload) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(error = %err, "malformed alert event, dropping");
            delivery.ack();
            return;
        }
    };

    match route::route_event(store, &event.tenant_id, &event).await {
        Ok(jobs) => {
            for job in &jobs {
                let subject = pulsegrid_bus::subject::routes(event.tenant_id.as_str());
                match serde_json::to_vec(job) {
                    Ok(bytes) => {
                        if let Err(err) = bus.publish(&subject, Bytes::from(bytes)).await {
                            tracing::warn!(
                                tenant_id = %event.tenant_id,
                                job_id = %job.job_id,
                                error = %err,
                                "failed to publish notification job"
                            );
                        }
                    }
                    Err(err) => tracing::error!(error = %err, "failed to serialize notification job"),
                }
            }
            delivery.ack();
        }
        Err(err) => {
            tracing::error!(
                tenant_id = %event.tenant_id,
                alert_id = %event.alert_id,
                error = %err,
                "routing failed, leaving event unacked for redelivery"
            );
            delivery.nack();
        }
    }
}
