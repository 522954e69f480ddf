use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use pulsegrid_bus::EventBus;
use pulsegrid_state::RelationalStore;
use serde::Serialize;

use crate::api::AppState;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

/// `GET /health` -- liveness only, no backend round trip.
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthBody { status: "ok" }))
}

/// `GET /ready` -- a cheap round trip against the relational store, and,
/// on a process that runs ingest, a bus ping plus a check that the batch
/// writer's background flusher is still alive (its `watch` heartbeat has
/// ticked recently). A process that doesn't run ingest has no
/// [`crate::api::ReadinessProbe`] and is judged solely on the relational
/// check.
pub async fn ready<R>(State(state): State<AppState<R>>) -> impl IntoResponse
where
    R: RelationalStore + 'static,
{
    if let Err(err) = state.relational.find_active_credential("__readiness_probe__").await {
        tracing::warn!(error = %err, "readiness probe failed: relational store unreachable");
        return (StatusCode::SERVICE_UNAVAILABLE, Json(HealthBody { status: "not_ready" }));
    }

    if let Some(readiness) = &state.readiness {
        if let Err(err) = readiness.bus.ping().await {
            tracing::warn!(error = %err, "readiness probe failed: bus unreachable");
            return (StatusCode::SERVICE_UNAVAILABLE, Json(HealthBody { status: "not_ready" }));
        }

        let last_beat = *readiness.heartbeat.borrow();
        if last_beat.elapsed() > readiness.heartbeat_staleness {
            tracing::warn!(
                stale_for_ms = last_beat.elapsed().as_millis() as u64,
                "readiness probe failed: batch writer heartbeat stale"
            );
            return (StatusCode::SERVICE_UNAVAILABLE, Json(HealthBody { status: "not_ready" }));
        }
    }

    (StatusCode::OK, Json(HealthBody { status: "ready" }))
}

/// `GET /metrics` -- Prometheus text exposition of the process's
/// [`pulsegrid_core::MetricsRegistry`].
pub async fn metrics<R>(State(state): State<AppState<R>>) -> impl IntoResponse
where
    R: RelationalStore + 'static,
{
    (StatusCode::OK, state.metrics.render())
}
