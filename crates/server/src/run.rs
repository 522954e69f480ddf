//! Wires the ingestion, evaluation, routing, and delivery components
//! together behind one HTTP listener and runs them until a shutdown
//! signal arrives.
//!
//! Generic over the concrete store/bus types so `main.rs` can pick either
//! backend pairing (in-memory for local development, Postgres + Redis
//! Streams for a real deployment) and monomorphize this function once,
//! rather than duplicating the wiring per backend.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::post;
use pulsegrid_bus::EventBus;
use pulsegrid_core::{MetricsRegistry, TenantId};
use pulsegrid_ingest::{IngestConfig, IngestPipeline, IngestState, ingest_telemetry, run_mqtt_subscriber};
use pulsegrid_jwks::{JwksConfig, JwksValidator};
use pulsegrid_state::{RelationalStore, TimeSeriesStore};
use tokio_util::sync::CancellationToken;

use crate::api::{self, AppState, ReadinessProbe};
use crate::config::{self, ServerConfig};
use crate::error::ServerError;

/// How stale the batch-writer heartbeat can be before `/ready` reports
/// not-ready. A few multiples of the age-flusher's own tick interval
/// (200ms, see `build_ingest_router`), generous enough to absorb a slow
/// tick under load without false-negatives.
const HEARTBEAT_STALENESS: Duration = Duration::from_secs(2);

/// Run every component this process's [`ServerConfig::role`] selects,
/// then serve HTTP until shutdown. Returns once the listener and every
/// background task have stopped.
pub async fn run<R, T, B, F, Fut>(
    config: ServerConfig,
    relational: Arc<R>,
    timeseries: Arc<T>,
    bus: Arc<B>,
    list_tenants: F,
) -> Result<(), ServerError>
where
    R: RelationalStore + 'static,
    T: TimeSeriesStore + 'static,
    B: EventBus + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Vec<TenantId>> + Send + 'static,
{
    let metrics = Arc::new(MetricsRegistry::new());
    let shutdown = CancellationToken::new();
    let mut background = Vec::new();

    let jwks_validator = build_jwks_validator(&config, &shutdown, &mut background);
    let (ingest_router, readiness) = match build_ingest_router(&config, &relational, &timeseries, &bus, &metrics, &shutdown, &mut background) {
        Some((router, readiness)) => (Some(router), Some(readiness)),
        None => (None, None),
    };

    if config.role.runs_eval() {
        let eval_config = pulsegrid_eval::EvalConfig::from_env();
        let evaluator = Arc::new(pulsegrid_eval::Evaluator::new(
            relational.clone(),
            timeseries.clone(),
            bus.clone(),
            eval_config.clone(),
            metrics.clone(),
        ));
        let poll_interval = eval_config.poll_interval;
        background.push(tokio::spawn(pulsegrid_eval::run_loop(evaluator, poll_interval, list_tenants, shutdown.clone())));
    }

    if config.role.runs_router() {
        let router_config = pulsegrid_router::RouterConfig::from_env();
        background.push(tokio::spawn(pulsegrid_router::run_router(relational.clone(), bus.clone(), router_config, shutdown.clone())));
    }

    if config.role.runs_delivery() {
        let delivery_config = pulsegrid_delivery::DeliveryConfig::from_env();
        let clients = Arc::new(build_dispatch_clients()?);
        background.push(tokio::spawn(pulsegrid_delivery::run_delivery_worker(
            relational.clone(),
            bus.clone(),
            clients,
            delivery_config.clone(),
            metrics.clone(),
            shutdown.clone(),
        )));
        background.push(tokio::spawn(pulsegrid_delivery::run_retry_scheduler(relational.clone(), bus.clone(), delivery_config, shutdown.clone())));
    }

    let app_state = AppState { relational: relational.clone(), metrics: metrics.clone(), readiness };
    let app = api::router(app_state, jwks_validator, ingest_router);

    let listener = tokio::net::TcpListener::bind((config.bind_host.as_str(), config.bind_port)).await?;
    tracing::info!(addr = %listener.local_addr()?, role = ?config.role, "pulsegrid-server listening");

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            serve_shutdown.cancel();
        })
        .await?;

    // The HTTP listener stopping is itself a shutdown trigger (e.g. a
    // test harness dropping the server), so cancel unconditionally before
    // draining background tasks.
    shutdown.cancel();
    for handle in background {
        let _ = handle.await;
    }

    Ok(())
}

fn build_jwks_validator(
    config: &ServerConfig,
    shutdown: &CancellationToken,
    background: &mut Vec<tokio::task::JoinHandle<()>>,
) -> Option<Arc<JwksValidator>> {
    let (url, issuer) = (config.jwks_url.clone()?, config.jwks_issuer.clone()?);
    let mut jwks_config = JwksConfig::new(url, issuer);
    jwks_config.audience = config.jwks_audience.clone();

    let cache = pulsegrid_jwks::shared(jwks_config);
    background.push(tokio::spawn(pulsegrid_jwks::run_refresh_loop(cache.clone(), shutdown.clone())));
    Some(Arc::new(JwksValidator::new(cache)))
}

#[allow(clippy::too_many_arguments)]
fn build_ingest_router<R, T, B>(
    config: &ServerConfig,
    relational: &Arc<R>,
    timeseries: &Arc<T>,
    bus: &Arc<B>,
    metrics: &Arc<MetricsRegistry>,
    shutdown: &CancellationToken,
    background: &mut Vec<tokio::task::JoinHandle<()>>,
) -> Option<(Router, ReadinessProbe)>
where
    R: RelationalStore + 'static,
    T: TimeSeriesStore + 'static,
    B: EventBus + 'static,
{
    if !config.role.runs_ingest() {
        return None;
    }

    let ingest_config = IngestConfig::from_env();
    let batch_writer = Arc::new(pulsegrid_ingest::batch::BatchWriter::new(
        timeseries.clone(),
        relational.clone(),
        bus.clone(),
        ingest_config.clone(),
        metrics.clone(),
    ));
    let readiness = ReadinessProbe {
        bus: bus.clone() as Arc<dyn EventBus>,
        heartbeat: batch_writer.heartbeat(),
        heartbeat_staleness: HEARTBEAT_STALENESS,
    };
    background.push(pulsegrid_ingest::batch::spawn_age_flusher(batch_writer.clone(), Duration::from_millis(200), shutdown.clone()));

    let pipeline = Arc::new(IngestPipeline::new(batch_writer, relational.clone(), ingest_config.clone(), metrics.clone()));

    if let Some(mqtt_config) = config::mqtt_ingest_settings_from_env() {
        let pipeline = pipeline.clone();
        let shutdown = shutdown.clone();
        let max_payload_bytes = ingest_config.max_payload_bytes;
        background.push(tokio::spawn(run_mqtt_subscriber(mqtt_config, pipeline, max_payload_bytes, shutdown)));
    }

    let ingest_state = Arc::new(IngestState { pipeline, relational: relational.clone(), config: ingest_config });
    let router = Router::new()
        .route(
            "/ingest/v1/tenant/{tenant}/device/{device}/telemetry",
            post(ingest_telemetry::<T, R, B>),
        )
        .with_state(ingest_state);
    Some((router, readiness))
}

fn build_dispatch_clients() -> Result<pulsegrid_delivery::DispatchClients, ServerError> {
    let smtp_settings = config::smtp_settings_from_env();
    let smtp_from_address = smtp_settings
        .as_ref()
        .map(|settings| settings.from_address.clone())
        .unwrap_or_else(|| "alerts@pulsegrid.example".to_owned());
    let smtp = smtp_settings
        .map(|settings| pulsegrid_provider_email::build_transport(&settings))
        .transpose()
        .map_err(ServerError::Config)?;
    let mqtt = config::mqtt_publisher_settings_from_env().map(|settings| pulsegrid_provider_mqtt::MqttPublisher::connect(&settings));

    Ok(pulsegrid_delivery::DispatchClients { http: reqwest::Client::new(), smtp, smtp_from_address, mqtt })
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
