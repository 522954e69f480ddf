use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use pulsegrid_bus::EventBus;
use pulsegrid_core::{DeviceId, Envelope, RejectionReason, TenantId};
use pulsegrid_state::RelationalStore;
use pulsegrid_state::TimeSeriesStore;
use serde::Serialize;

use crate::config::IngestConfig;
use crate::context;
use crate::pipeline::IngestPipeline;
use crate::validate;

/// Shared state behind the HTTP ingest route,
/// `POST /ingest/v1/tenant/{tenant}/device/{device}/telemetry`.
pub struct IngestState<T, R, B> {
    pub pipeline: Arc<IngestPipeline<T, R, B>>,
    pub relational: Arc<R>,
    pub config: IngestConfig,
}

#[derive(Serialize)]
struct RejectionBody {
    rejection_reason: String,
}

fn bearer_secret(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn status_for(reason: &RejectionReason) -> StatusCode {
    match reason {
        RejectionReason::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn reject_response(reason: RejectionReason) -> Response {
    let status = status_for(&reason);
    (status, Json(RejectionBody { rejection_reason: reason.code() })).into_response()
}

/// Best-effort JSON view of a raw body for a `QuarantineEvent`'s payload
/// column, for rejections that happen before (or instead of) a successful
/// parse. Falls back to a size-only summary rather than storing an
/// arbitrarily large or non-JSON body verbatim.
fn quarantine_payload(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).unwrap_or_else(|_| serde_json::json!({ "size_bytes": body.len() }))
}

pub async fn ingest_telemetry<T, R, B>(
    State(state): State<Arc<IngestState<T, R, B>>>,
    Path((tenant, device)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    T: TimeSeriesStore + 'static,
    R: RelationalStore + 'static,
    B: EventBus + 'static,
{
    let tenant_id = TenantId::new(tenant.clone());
    let device_id = DeviceId::new(device.clone());
    let topic = format!("http:/ingest/v1/tenant/{tenant_id}/device/{device}/telemetry");

    if let Err(reason) = validate::validate_payload_size(body.len(), &state.config) {
        state
            .pipeline
            .record_rejection(&tenant_id, &topic, &device_id, &quarantine_payload(&body), reason.clone())
            .await;
        return reject_response(reason);
    }

    let Some(secret) = bearer_secret(&headers) else {
        let reason = RejectionReason::BadCredentials;
        state
            .pipeline
            .record_rejection(&tenant_id, &topic, &device_id, &quarantine_payload(&body), reason.clone())
            .await;
        return reject_response(reason);
    };

    let authenticated = match context::authenticate(state.relational.as_ref(), &device, secret).await {
        Ok(auth) => auth,
        Err(err) => {
            tracing::error!(error = %err, "credential lookup failed");
            let reason = RejectionReason::BadCredentials;
            state
                .pipeline
                .record_rejection(&tenant_id, &topic, &device_id, &quarantine_payload(&body), reason.clone())
                .await;
            return reject_response(reason);
        }
    };

    let Some(authenticated) = authenticated else {
        let reason = RejectionReason::BadCredentials;
        state
            .pipeline
            .record_rejection(&tenant_id, &topic, &device_id, &quarantine_payload(&body), reason.clone())
            .await;
        return reject_response(reason);
    };

    if authenticated.tenant_id.as_str() != tenant || authenticated.device_id.as_str() != device {
        let reason = RejectionReason::UnknownDevice;
        state
            .pipeline
            .record_rejection(&tenant_id, &topic, &device_id, &quarantine_payload(&body), reason.clone())
            .await;
        return reject_response(reason);
    }

    let raw_payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => {
            let reason = RejectionReason::SchemaInvalid { detail: err.to_string() };
            state
                .pipeline
                .record_rejection(&tenant_id, &topic, &device_id, &quarantine_payload(&body), reason.clone())
                .await;
            return reject_response(reason);
        }
    };

    let envelope: Envelope = match serde_json::from_value(raw_payload.clone()) {
        Ok(envelope) => envelope,
        Err(err) => {
            let reason = RejectionReason::SchemaInvalid { detail: err.to_string() };
            state
                .pipeline
                .record_rejection(&tenant_id, &topic, &device_id, &raw_payload, reason.clone())
                .await;
            return reject_response(reason);
        }
    };

    if envelope.device_id.as_str() != device {
        let reason = RejectionReason::SchemaInvalid {
            detail: "envelope device_id does not match path".to_owned(),
        };
        state
            .pipeline
            .record_rejection(&tenant_id, &topic, &device_id, &raw_payload, reason.clone())
            .await;
        return reject_response(reason);
    }

    match state.pipeline.accept(&tenant_id, &topic, envelope, &raw_payload).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(reason) => reject_response(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_maps_to_429() {
        assert_eq!(status_for(&RejectionReason::RateLimited), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn other_reasons_map_to_400() {
        assert_eq!(status_for(&RejectionReason::UnknownDevice), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn bearer_secret_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_secret(&headers), Some("abc123"));
    }
}
