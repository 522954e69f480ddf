use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors surfaced while starting or running the server binary.
///
/// Per-request failures inside a handler are mapped to a status code
/// directly by that handler; this enum covers startup wiring (connecting
/// the store, the bus, the JWKS cache) and the handful of request-time
/// failures common to every protected route.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state error: {0}")]
    State(#[from] pulsegrid_state::StateError),

    #[error("tenancy error: {0}")]
    Tenancy(#[from] pulsegrid_tenancy::TenancyError),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found")]
    NotFound,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            Self::NotFound => (StatusCode::NOT_FOUND, "not found".to_owned()),
            Self::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            Self::Io(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            Self::State(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            Self::Tenancy(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        };
        (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
    }
}
