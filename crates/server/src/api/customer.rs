//! `/customer/*`: tenant-scoped surface, tenant taken from the validated
//! JWT's `tenant_id` claim rather than the path, so one tenant cannot
//! address another's resources by changing a path segment.
//!
//! The full device/rule/channel CRUD surface backs a browser UI that is
//! out of scope here; these handlers exercise the representative
//! reads/actions the rest of the system already supports through
//! [`RelationalStore`], not a complete REST API.

use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::response::IntoResponse;
use pulsegrid_core::{AlertId, DeviceId, TenantId};
use pulsegrid_jwks::Claims;
use pulsegrid_state::RelationalStore;

use crate::api::AppState;
use crate::error::ServerError;

fn claims_tenant(claims: &Claims) -> Result<TenantId, ServerError> {
    claims
        .tenant_id
        .clone()
        .map(TenantId::new)
        .ok_or_else(|| ServerError::Unauthorized("customer token missing tenant_id claim".to_owned()))
}

pub async fn get_device<R>(
    State(state): State<AppState<R>>,
    Extension(claims): Extension<Claims>,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, ServerError>
where
    R: RelationalStore + 'static,
{
    let tenant_id = claims_tenant(&claims)?;
    let device = state.relational.get_device(&tenant_id, &DeviceId::new(device_id)).await?;
    device.map(Json).ok_or(ServerError::NotFound)
}

pub async fn acknowledge_alert<R>(
    State(state): State<AppState<R>>,
    Extension(claims): Extension<Claims>,
    Path(alert_id): Path<String>,
) -> Result<impl IntoResponse, ServerError>
where
    R: RelationalStore + 'static,
{
    let tenant_id = claims_tenant(&claims)?;
    let alert = state.relational.acknowledge_alert(&tenant_id, &AlertId::new(alert_id)).await?;
    alert.map(Json).ok_or(ServerError::NotFound)
}
