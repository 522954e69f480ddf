/// The row-level security policy clause shared by every tenant-scoped
/// table, parameterized only by the session-variable name so every call
/// site stays in sync if it is ever renamed.
#[must_use]
pub fn rls_using_clause(tenant_setting: &str) -> String {
    format!("tenant_id = current_setting('{tenant_setting}', true)")
}

/// DDL enabling row-level security and installing the standard policy on
/// `table`, plus revoking default access and granting the minimum needed to
/// the application role. Used by `pulsegrid-state-postgres`'s migrations for
/// every tenant-scoped table.
#[must_use]
pub fn enable_rls_ddl(table: &str, app_role: &str, tenant_setting: &str) -> String {
    format!(
        "ALTER TABLE {table} ENABLE ROW LEVEL SECURITY; \
         DROP POLICY IF EXISTS tenant_isolation ON {table}; \
         CREATE POLICY tenant_isolation ON {table} USING ({using}); \
         REVOKE ALL ON {table} FROM PUBLIC; \
         GRANT SELECT, INSERT, UPDATE, DELETE ON {table} TO {app_role};",
        using = rls_using_clause(tenant_setting),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn using_clause_references_session_setting() {
        let clause = rls_using_clause("app.tenant_id");
        assert!(clause.contains("current_setting('app.tenant_id', true)"));
    }

    #[test]
    fn ddl_grants_only_to_app_role() {
        let ddl = enable_rls_ddl("devices", "pulsegrid_app", "app.tenant_id");
        assert!(ddl.contains("ENABLE ROW LEVEL SECURITY"));
        assert!(ddl.contains("GRANT SELECT, INSERT, UPDATE, DELETE ON devices TO pulsegrid_app"));
    }
}
