use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pulsegrid_server::config::{BusBackend, ServerConfig, StorageBackend};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// `pulsegrid-server` process: runs the ingest, evaluation, routing, and
/// delivery components (all four by default, or a single one per
/// `--role`/`PULSEGRID_ROLE`) behind one HTTP listener.
#[derive(Parser, Debug)]
#[command(name = "pulsegrid-server", about = "Telemetry ingest, evaluation, and alert delivery server")]
struct Cli {
    /// Override the bind host (`PULSEGRID_BIND_HOST`).
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port (`PULSEGRID_BIND_PORT`).
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::from_env();
    if let Some(host) = cli.host {
        config.bind_host = host;
    }
    if let Some(port) = cli.port {
        config.bind_port = port;
    }

    match (config.storage_backend, config.bus_backend) {
        (StorageBackend::Memory, BusBackend::Memory) => {
            let relational = Arc::new(pulsegrid_state_memory::MemoryRelationalStore::new());
            let timeseries = Arc::new(pulsegrid_state_memory::MemoryTimeSeriesStore::new());
            let bus = Arc::new(pulsegrid_bus::MemoryEventBus::new());
            let list_tenants = memory_tenant_lister(relational.clone());
            pulsegrid_server::run(config, relational, timeseries, bus, list_tenants).await?;
        }
        (StorageBackend::Memory, BusBackend::Redis) => {
            let relational = Arc::new(pulsegrid_state_memory::MemoryRelationalStore::new());
            let timeseries = Arc::new(pulsegrid_state_memory::MemoryTimeSeriesStore::new());
            let bus_config = pulsegrid_bus::BusConfig::from_env();
            let bus = Arc::new(pulsegrid_bus::RedisStreamsEventBus::new(&bus_config)?);
            let list_tenants = memory_tenant_lister(relational.clone());
            pulsegrid_server::run(config, relational, timeseries, bus, list_tenants).await?;
        }
        (StorageBackend::Postgres, BusBackend::Memory) => {
            let (relational, timeseries, isolation) = connect_postgres().await?;
            let (retention_shutdown, retention_handle) = spawn_retention_sweep(isolation.clone());
            let bus = Arc::new(pulsegrid_bus::MemoryEventBus::new());
            let list_tenants = postgres_tenant_lister(isolation);
            pulsegrid_server::run(config, relational, timeseries, bus, list_tenants).await?;
            retention_shutdown.cancel();
            let _ = retention_handle.await;
        }
        (StorageBackend::Postgres, BusBackend::Redis) => {
            let (relational, timeseries, isolation) = connect_postgres().await?;
            let (retention_shutdown, retention_handle) = spawn_retention_sweep(isolation.clone());
            let bus_config = pulsegrid_bus::BusConfig::from_env();
            let bus = Arc::new(pulsegrid_bus::RedisStreamsEventBus::new(&bus_config)?);
            let list_tenants = postgres_tenant_lister(isolation);
            pulsegrid_server::run(config, relational, timeseries, bus, list_tenants).await?;
            retention_shutdown.cancel();
            let _ = retention_handle.await;
        }
    }

    info!("pulsegrid-server shut down");
    Ok(())
}

/// Connect the shared pool, ensure roles, run migrations, and hand back
/// both stores plus a spare [`pulsegrid_tenancy::TenantIsolation`] handle
/// for tenant listing and the retention sweep.
///
/// Mirrors [`pulsegrid_state_postgres::connect`] rather than calling it
/// directly: that convenience wrapper consumes its `TenantIsolation`
/// building the two stores and does not hand one back.
async fn connect_postgres() -> Result<
    (
        Arc<pulsegrid_state_postgres::PostgresRelationalStore>,
        Arc<pulsegrid_state_postgres::PostgresTimeSeriesStore>,
        pulsegrid_tenancy::TenantIsolation,
    ),
    Box<dyn std::error::Error>,
> {
    let tenancy_config = pulsegrid_tenancy::TenancyConfig::from_env();
    let isolation = pulsegrid_tenancy::TenantIsolation::connect(tenancy_config.clone()).await?;
    isolation.ensure_roles().await?;
    pulsegrid_state_postgres::migrations::run_migrations(isolation.pool(), &tenancy_config).await?;

    let channel_secret_key = pulsegrid_state_postgres::config::channel_secret_master_key_from_env()?;
    let relational = Arc::new(pulsegrid_state_postgres::PostgresRelationalStore::new(isolation.clone(), channel_secret_key));
    let timeseries = Arc::new(pulsegrid_state_postgres::PostgresTimeSeriesStore::new(isolation.clone()));
    Ok((relational, timeseries, isolation))
}

fn memory_tenant_lister(
    relational: Arc<pulsegrid_state_memory::MemoryRelationalStore>,
) -> impl Fn() -> std::future::Ready<Vec<pulsegrid_core::TenantId>> + Send + Sync + 'static {
    move || std::future::ready(relational.tenant_ids())
}

fn postgres_tenant_lister(
    isolation: pulsegrid_tenancy::TenantIsolation,
) -> impl Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = Vec<pulsegrid_core::TenantId>> + Send>> + Send + Sync + 'static
{
    move || {
        let isolation = isolation.clone();
        Box::pin(async move {
            pulsegrid_state_postgres::list_tenant_ids(&isolation).await.unwrap_or_else(|err| {
                tracing::warn!(error = %err, "failed to list tenants for evaluation tick");
                Vec::new()
            })
        })
    }
}

/// Periodic telemetry/quarantine retention sweep, independent of the main
/// [`pulsegrid_server::run`] shutdown token since it has no in-memory
/// counterpart and is only ever spawned on the `Postgres` storage backend.
fn spawn_retention_sweep(isolation: pulsegrid_tenancy::TenantIsolation) -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let shutdown = CancellationToken::new();
    let task_shutdown = shutdown.clone();
    let store_config = pulsegrid_state_postgres::PostgresStoreConfig::from_env();
    let handle = tokio::spawn(async move {
        let mut timer = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        timer.tick().await;
        loop {
            tokio::select! {
                () = task_shutdown.cancelled() => break,
                _ = timer.tick() => {
                    if let Err(err) = pulsegrid_state_postgres::run_retention_sweep(&isolation, &store_config).await {
                        tracing::warn!(error = %err, "retention sweep failed");
                    }
                }
            }
        }
    });
    (shutdown, handle)
}
