//! `/operator/*`: cross-tenant surface for operator-role tokens, tenant
//! taken from the path since an operator addresses any tenant's
//! resources (the Tenant Isolation Substrate's operator role bypasses
//! row-level security for exactly this reason).
//!
//! Scoped the same way as [`crate::api::customer`]: representative reads
//! through [`RelationalStore`], not a full administrative console.

use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use pulsegrid_core::{AlertId, DeviceId, TenantId};
use pulsegrid_state::RelationalStore;

use crate::api::AppState;
use crate::error::ServerError;

pub async fn get_device<R>(
    State(state): State<AppState<R>>,
    Path((tenant_id, device_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ServerError>
where
    R: RelationalStore + 'static,
{
    let tenant_id = TenantId::new(tenant_id);
    let device = state.relational.get_device(&tenant_id, &DeviceId::new(device_id)).await?;
    device.map(Json).ok_or(ServerError::NotFound)
}

pub async fn get_alert<R>(
    State(state): State<AppState<R>>,
    Path((tenant_id, alert_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ServerError>
where
    R: RelationalStore + 'static,
{
    let tenant_id = TenantId::new(tenant_id);
    let alert = state.relational.get_alert(&tenant_id, &AlertId::new(alert_id)).await?;
    alert.map(Json).ok_or(ServerError::NotFound)
}
