use futures::future::BoxFuture;
use pulsegrid_core::TenantId;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{Instrument, instrument};

use crate::config::TenancyConfig;
use crate::error::TenancyError;

/// The tenant isolation substrate.
///
/// Owns the single `sqlx::PgPool` for the relational store. The only ways to
/// reach a connection from outside this crate are [`TenantIsolation::with_tenant`]
/// and [`TenantIsolation::with_operator`] -- no caller obtains a raw
/// `PgConnection`.
///
/// Every tenant-scoped table carries a row-level security policy of
/// `USING (tenant_id = current_setting('app.tenant_id', true))`; `with_tenant`
/// sets that session variable with `set_config(..., true)` (the `true` marks
/// it transaction-local), so it is cleared automatically on commit or
/// rollback and never leaks to the next borrower of a pooled connection even
/// if `action` panics mid-transaction.
#[derive(Clone)]
pub struct TenantIsolation {
    pool: PgPool,
    config: TenancyConfig,
}

impl TenantIsolation {
    /// Connect the pool and return the substrate. Does not create roles or
    /// run migrations; call [`TenantIsolation::ensure_roles`] once at
    /// startup for a fresh database.
    ///
    /// # Errors
    ///
    /// Returns [`TenancyError::Database`] if the pool cannot be established.
    pub async fn connect(config: TenancyConfig) -> Result<Self, TenancyError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect(&config.database_url)
            .await?;
        Ok(Self { pool, config })
    }

    /// Wrap an already-constructed pool (used by `pulsegrid-state-postgres`
    /// when the pool is shared with the time-series store).
    #[must_use]
    pub fn from_pool(pool: PgPool, config: TenancyConfig) -> Self {
        Self { pool, config }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the application and operator roles if they do not already
    /// exist. Idempotent; safe to call on every startup.
    ///
    /// # Errors
    ///
    /// Returns [`TenancyError::Database`] if the DDL fails, or
    /// [`TenancyError::InvalidRoleName`] if a configured role name is not a
    /// valid unquoted SQL identifier (this crate interpolates role names
    /// into DDL since `PostgreSQL` does not accept bind parameters for
    /// identifiers).
    pub async fn ensure_roles(&self) -> Result<(), TenancyError> {
        validate_identifier(&self.config.app_role)?;
        validate_identifier(&self.config.operator_role)?;

        let create_app = format!(
            "DO $$ BEGIN \
               IF NOT EXISTS (SELECT FROM pg_roles WHERE rolname = '{app}') THEN \
                 CREATE ROLE {app} NOLOGIN; \
               END IF; \
             END $$;",
            app = self.config.app_role
        );
        let create_operator = format!(
            "DO $$ BEGIN \
               IF NOT EXISTS (SELECT FROM pg_roles WHERE rolname = '{op}') THEN \
                 CREATE ROLE {op} NOLOGIN BYPASSRLS; \
               END IF; \
             END $$;",
            op = self.config.operator_role
        );

        sqlx::query(&create_app).execute(&self.pool).await?;
        sqlx::query(&create_operator).execute(&self.pool).await?;
        Ok(())
    }

    /// Run `action` in a transaction scoped to `tenant_id`: `SET LOCAL ROLE`
    /// to the row-level-security-subject application role, `set_config`
    /// the tenant session variable (transaction-local), run `action`,
    /// commit on success or roll back on error.
    ///
    /// If `action` returns `Err`, the transaction is rolled back and the
    /// error is propagated; the caller decides whether to retry.
    #[instrument(skip(self, action), fields(tenant_id = %tenant_id))]
    pub async fn with_tenant<T, F>(&self, tenant_id: &TenantId, action: F) -> Result<T, TenancyError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut sqlx::PgConnection) -> BoxFuture<'c, Result<T, TenancyError>>
            + Send,
    {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("SET LOCAL ROLE {}", self.config.app_role))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
                "SELECT set_config('{}', $1, true)",
                self.config.tenant_setting
            ))
            .bind(tenant_id.as_str())
            .execute(&mut *tx)
            .await?;

        let result = action(&mut tx).instrument(tracing::Span::current()).await;

        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(tenant_id = %tenant_id, error = %rollback_err, "rollback failed after action error");
                }
                Err(err)
            }
        }
    }

    /// Run `action` under the operator role, which bypasses row-level
    /// security. Callers must be explicitly authorized; this crate does
    /// not itself perform authorization checks.
    #[instrument(skip(self, action))]
    pub async fn with_operator<T, F>(&self, action: F) -> Result<T, TenancyError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut sqlx::PgConnection) -> BoxFuture<'c, Result<T, TenancyError>>
            + Send,
    {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("SET LOCAL ROLE {}", self.config.operator_role))
            .execute(&mut *tx)
            .await?;

        let result = action(&mut tx).await;
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                let _ = tx.rollback().await;
                Err(err)
            }
        }
    }
}

/// Reject anything that is not a plain lowercase SQL identifier, since role
/// names are interpolated directly into DDL (bind parameters cannot carry
/// identifiers).
fn validate_identifier(name: &str) -> Result<(), TenancyError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && name.chars().next().is_some_and(|c| c.is_ascii_lowercase());
    if valid {
        Ok(())
    } else {
        Err(TenancyError::InvalidRoleName(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_identifiers_with_special_characters() {
        assert!(validate_identifier("pulsegrid_app").is_ok());
        assert!(validate_identifier("pulsegrid-app").is_err());
        assert!(validate_identifier("Robert'); DROP TABLE students;--").is_err());
        assert!(validate_identifier("").is_err());
    }
}
