pub mod auth;
pub mod customer;
pub mod health;
pub mod operator;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use pulsegrid_core::MetricsRegistry;
use pulsegrid_jwks::JwksValidator;
use pulsegrid_state::RelationalStore;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Connectivity a running ingest pipeline can report on for `/ready`,
/// absent on processes whose `ServerConfig::role` doesn't run ingest (no
/// batch writer or bus handle to ask).
#[derive(Clone)]
pub struct ReadinessProbe {
    pub bus: Arc<dyn pulsegrid_bus::EventBus>,
    pub heartbeat: watch::Receiver<Instant>,
    pub heartbeat_staleness: Duration,
}

/// Shared state behind every non-ingest route. Generic only over `R`:
/// the HTTP surface never touches the time-series store or the bus
/// directly, so this stays free of the extra type parameters the ingest
/// and evaluation pipelines carry.
pub struct AppState<R> {
    pub relational: Arc<R>,
    pub metrics: Arc<MetricsRegistry>,
    pub readiness: Option<ReadinessProbe>,
}

// Written by hand rather than `#[derive(Clone)]`: the derive would add an
// `R: Clone` bound, but `R` (e.g. `PostgresRelationalStore`) is shared
// behind the `Arc` precisely so it doesn't need to implement `Clone`
// itself.
impl<R> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            relational: self.relational.clone(),
            metrics: self.metrics.clone(),
            readiness: self.readiness.clone(),
        }
    }
}

/// Assemble the full HTTP router.
///
/// `ingest_router` is accepted pre-built (already reduced to `Router<()>`
/// via its own `with_state`) so this function does not need to be
/// parameterized over the ingest pipeline's time-series/bus generics.
/// `jwks_validator` gates `/customer/*` and `/operator/*`; when absent
/// (no JWKS configured for this deployment) those two route groups are
/// omitted entirely rather than served unauthenticated.
pub fn router<R>(app_state: AppState<R>, jwks_validator: Option<Arc<JwksValidator>>, ingest_router: Option<Router>) -> Router
where
    R: RelationalStore + 'static,
{
    let mut app = Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready::<R>))
        .route("/metrics", get(health::metrics::<R>))
        .with_state(app_state.clone());

    if let Some(ingest_router) = ingest_router {
        app = app.merge(ingest_router);
    }

    if let Some(validator) = jwks_validator {
        let customer = Router::new()
            .route("/customer/devices/{device_id}", get(customer::get_device::<R>))
            .route("/customer/alerts/{alert_id}/ack", post(customer::acknowledge_alert::<R>))
            .with_state(app_state.clone())
            .layer(middleware::from_fn_with_state(validator.clone(), auth::require_customer));

        let operator = Router::new()
            .route("/operator/tenants/{tenant_id}/devices/{device_id}", get(operator::get_device::<R>))
            .route("/operator/tenants/{tenant_id}/alerts/{alert_id}", get(operator::get_alert::<R>))
            .with_state(app_state)
            .layer(middleware::from_fn_with_state(validator, auth::require_operator));

        app = app.merge(customer).merge(operator);
    }

    app.layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive())
}
