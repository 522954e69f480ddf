/// Configuration for the Tenant Isolation Substrate's connection pool and
/// role names.
///
/// Loaded from environment variables by [`TenancyConfig::from_env`]; every
/// field has a documented default so the substrate is usable unconfigured
/// in a local or test environment.
#[derive(Debug, Clone)]
pub struct TenancyConfig {
    /// `PostgreSQL` connection string for the relational store.
    pub database_url: String,
    /// Maximum connections in the pool.
    pub pool_size: u32,
    /// Role subject to row-level security, used by `with_tenant`.
    pub app_role: String,
    /// Role that bypasses row-level security, used by `with_operator`.
    pub operator_role: String,
    /// Session variable name carrying the tenant id, matched by every
    /// tenant-scoped table's RLS policy.
    pub tenant_setting: String,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost:5432/pulsegrid".to_owned(),
            pool_size: 10,
            app_role: "pulsegrid_app".to_owned(),
            operator_role: "pulsegrid_operator".to_owned(),
            tenant_setting: "app.tenant_id".to_owned(),
        }
    }
}

impl TenancyConfig {
    /// Load configuration from environment variables, falling back to the
    /// documented default for any variable that is unset.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("PULSEGRID_DATABASE_URL")
                .unwrap_or(defaults.database_url),
            pool_size: std::env::var("PULSEGRID_DB_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.pool_size),
            app_role: std::env::var("PULSEGRID_APP_ROLE").unwrap_or(defaults.app_role),
            operator_role: std::env::var("PULSEGRID_OPERATOR_ROLE")
                .unwrap_or(defaults.operator_role),
            tenant_setting: defaults.tenant_setting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = TenancyConfig::default();
        assert_eq!(cfg.tenant_setting, "app.tenant_id");
        assert!(cfg.pool_size > 0);
    }
}
