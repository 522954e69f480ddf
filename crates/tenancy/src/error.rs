use thiserror::Error;

/// Errors surfaced by the Tenant Isolation Substrate.
///
/// A tenant-context-absence failure must never leak data -- it is always
/// a 500-class error, never silently treated as "no rows".
#[derive(Debug, Error)]
pub enum TenancyError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid role name: {0}")]
    InvalidRoleName(String),

    #[error("action failed: {0}")]
    Action(String),
}
