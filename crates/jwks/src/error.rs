use thiserror::Error;

/// Errors surfaced by the JWKS validator.
#[derive(Debug, Error)]
pub enum JwksError {
    #[error("fetching JWKS document: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("JWKS source returned status {0}")]
    SourceStatus(reqwest::StatusCode),

    #[error("token header references unknown key id: {0}")]
    UnknownKid(String),

    #[error("token header names an unsupported algorithm: {0:?}")]
    UnsupportedAlgorithm(jsonwebtoken::Algorithm),

    #[error("token issuer does not match the configured issuer")]
    UnknownIssuer,

    #[error("token signature or claims invalid: {0}")]
    Decode(#[from] jsonwebtoken::errors::Error),

    #[error("unknown role in token claims: {0}")]
    UnknownRole(String),

    #[error("JWKS cache has no usable key material within the staleness cap")]
    StaleBeyondCap,
}
