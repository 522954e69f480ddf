//! JWT-role gate for `/customer/*` and `/operator/*`: a tenant-scoped
//! customer token for one audience, a cross-tenant operator token for the
//! other. This crate validates the bearer token and the `role` claim; it
//! does not issue tokens or manage an identity provider.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use pulsegrid_jwks::{JwksValidator, Role};

use crate::error::ServerError;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

async fn gate(validator: &JwksValidator, required: Role, mut request: Request, next: Next) -> Response {
    let Some(token) = bearer_token(request.headers()) else {
        return ServerError::Unauthorized("missing bearer token".to_owned()).into_response();
    };

    let claims = match validator.validate(token).await {
        Ok(claims) => claims,
        Err(err) => return ServerError::Unauthorized(err.to_string()).into_response(),
    };

    let role = match claims.role() {
        Ok(role) => role,
        Err(err) => return ServerError::Unauthorized(err.to_string()).into_response(),
    };
    if role != required {
        return ServerError::Forbidden(format!("token role {role} does not match required role {required}")).into_response();
    }
    if required == Role::Customer && claims.tenant_id.is_none() {
        return ServerError::Unauthorized("customer token missing tenant_id claim".to_owned()).into_response();
    }

    request.extensions_mut().insert(claims);
    next.run(request).await
}

pub async fn require_customer(State(validator): State<Arc<JwksValidator>>, request: Request, next: Next) -> Response {
    gate(&validator, Role::Customer, request, next).await
}

pub async fn require_operator(State(validator): State<Arc<JwksValidator>>, request: Request, next: Next) -> Response {
    gate(&validator, Role::Operator, request, next).await
}
