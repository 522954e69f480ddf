use pulsegrid_tenancy::{TenancyConfig, enable_rls_ddl};
use sqlx::PgPool;

/// Tables carrying row-level security, in creation order (no foreign keys
/// cross these, so order only matters for readability).
const TENANT_SCOPED_TABLES: &[&str] = &[
    "devices",
    "device_credentials",
    "alert_rules",
    "alerts",
    "escalation_policies",
    "oncall_schedules",
    "notification_channels",
    "notification_routing_rules",
    "notification_jobs",
    "dead_letters",
    "quarantine_events",
    "telemetry",
];

/// Create every table this crate needs if absent, and install row-level
/// security on each tenant-scoped one.
///
/// Idempotent; safe to call on every startup. Does not create roles --
/// call [`pulsegrid_tenancy::TenantIsolation::ensure_roles`] first so the
/// `GRANT` statements here have a role to target.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &PgPool, config: &TenancyConfig) -> Result<(), sqlx::Error> {
    for statement in CREATE_TABLES {
        sqlx::query(statement).execute(pool).await?;
    }

    for table in TENANT_SCOPED_TABLES {
        let ddl = enable_rls_ddl(table, &config.app_role, &config.tenant_setting);
        for stmt in ddl.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(stmt).execute(pool).await?;
        }
    }

    Ok(())
}

const CREATE_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS devices (
        tenant_id TEXT NOT NULL,
        device_id TEXT NOT NULL,
        display_name TEXT NOT NULL,
        device_type TEXT NOT NULL,
        site_id TEXT,
        geo_lat DOUBLE PRECISION,
        geo_lon DOUBLE PRECISION,
        status TEXT NOT NULL,
        last_seen_at TIMESTAMPTZ,
        template_id TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (tenant_id, device_id)
    )",
    "CREATE TABLE IF NOT EXISTS device_credentials (
        tenant_id TEXT NOT NULL,
        device_id TEXT NOT NULL,
        token_id TEXT NOT NULL,
        client_id TEXT NOT NULL UNIQUE,
        secret_hash TEXT NOT NULL,
        issued_at TIMESTAMPTZ NOT NULL,
        revoked_at TIMESTAMPTZ,
        PRIMARY KEY (tenant_id, device_id, token_id)
    )",
    "CREATE TABLE IF NOT EXISTS alert_rules (
        tenant_id TEXT NOT NULL,
        rule_id TEXT NOT NULL,
        name TEXT NOT NULL,
        metric_name TEXT NOT NULL,
        operator TEXT NOT NULL,
        threshold DOUBLE PRECISION NOT NULL,
        severity SMALLINT NOT NULL,
        duration_seconds BIGINT NOT NULL,
        site_ids JSONB,
        enabled BOOLEAN NOT NULL,
        escalation_policy_id TEXT,
        updated_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (tenant_id, rule_id)
    )",
    "CREATE TABLE IF NOT EXISTS alerts (
        tenant_id TEXT NOT NULL,
        alert_id TEXT NOT NULL,
        device_id TEXT NOT NULL,
        site_id TEXT,
        alert_type TEXT NOT NULL,
        fingerprint TEXT NOT NULL,
        status TEXT NOT NULL,
        severity SMALLINT NOT NULL,
        confidence DOUBLE PRECISION NOT NULL,
        summary TEXT NOT NULL,
        details JSONB NOT NULL,
        escalation_level INT NOT NULL,
        next_escalation_at TIMESTAMPTZ,
        opened_at TIMESTAMPTZ NOT NULL,
        closed_at TIMESTAMPTZ,
        PRIMARY KEY (tenant_id, alert_id)
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS alerts_live_fingerprint
        ON alerts (tenant_id, fingerprint)
        WHERE status IN ('open', 'acknowledged')",
    "CREATE INDEX IF NOT EXISTS alerts_due_for_escalation
        ON alerts (tenant_id, next_escalation_at)
        WHERE status IN ('open', 'acknowledged')",
    "CREATE TABLE IF NOT EXISTS escalation_policies (
        tenant_id TEXT NOT NULL,
        policy_id TEXT NOT NULL,
        name TEXT NOT NULL,
        levels JSONB NOT NULL,
        PRIMARY KEY (tenant_id, policy_id)
    )",
    "CREATE TABLE IF NOT EXISTS oncall_schedules (
        tenant_id TEXT NOT NULL,
        schedule_id TEXT NOT NULL,
        name TEXT NOT NULL,
        timezone TEXT NOT NULL,
        layers JSONB NOT NULL,
        overrides JSONB NOT NULL,
        PRIMARY KEY (tenant_id, schedule_id)
    )",
    "CREATE TABLE IF NOT EXISTS notification_channels (
        tenant_id TEXT NOT NULL,
        channel_id TEXT NOT NULL,
        config JSONB NOT NULL,
        is_enabled BOOLEAN NOT NULL,
        PRIMARY KEY (tenant_id, channel_id)
    )",
    "CREATE TABLE IF NOT EXISTS notification_routing_rules (
        tenant_id TEXT NOT NULL,
        rule_id TEXT NOT NULL,
        channel_id TEXT NOT NULL,
        min_severity SMALLINT NOT NULL,
        alert_type TEXT,
        site_ids JSONB,
        device_prefixes JSONB,
        deliver_on JSONB NOT NULL,
        priority INT NOT NULL,
        enabled BOOLEAN NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (tenant_id, rule_id)
    )",
    "CREATE INDEX IF NOT EXISTS routing_rules_enabled_order
        ON notification_routing_rules (tenant_id, priority, created_at)
        WHERE enabled",
    "CREATE TABLE IF NOT EXISTS notification_jobs (
        tenant_id TEXT NOT NULL,
        job_id TEXT NOT NULL,
        alert_id TEXT NOT NULL,
        channel_id TEXT NOT NULL,
        deliver_on_event TEXT NOT NULL,
        status TEXT NOT NULL,
        attempts INT NOT NULL,
        last_error TEXT,
        next_attempt_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        resolved_target_email TEXT,
        PRIMARY KEY (tenant_id, job_id),
        UNIQUE (tenant_id, alert_id, channel_id, deliver_on_event)
    )",
    "CREATE INDEX IF NOT EXISTS notification_jobs_due_for_retry
        ON notification_jobs (next_attempt_at)
        WHERE status = 'pending'",
    "CREATE TABLE IF NOT EXISTS notification_attempts (
        job_id TEXT NOT NULL,
        attempt_no INT NOT NULL,
        ok BOOLEAN NOT NULL,
        transport_status TEXT,
        latency_ms BIGINT NOT NULL,
        error TEXT,
        at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (job_id, attempt_no)
    )",
    "CREATE TABLE IF NOT EXISTS dead_letters (
        tenant_id TEXT NOT NULL,
        job_id TEXT NOT NULL,
        alert_id TEXT NOT NULL,
        channel_id TEXT NOT NULL,
        attempts INT NOT NULL,
        final_error TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        replayed_at TIMESTAMPTZ,
        PRIMARY KEY (tenant_id, job_id)
    )",
    "CREATE TABLE IF NOT EXISTS quarantine_events (
        id BIGSERIAL PRIMARY KEY,
        time TIMESTAMPTZ NOT NULL,
        tenant_id TEXT NOT NULL,
        device_id TEXT NOT NULL,
        topic TEXT NOT NULL,
        reason_code TEXT NOT NULL,
        reason JSONB NOT NULL,
        payload JSONB NOT NULL,
        envelope_version TEXT,
        seq BIGINT
    )",
    "CREATE INDEX IF NOT EXISTS quarantine_seq_lookup
        ON quarantine_events (tenant_id, device_id, seq)
        WHERE seq IS NOT NULL",
    "CREATE TABLE IF NOT EXISTS telemetry (
        id BIGSERIAL PRIMARY KEY,
        time TIMESTAMPTZ NOT NULL,
        tenant_id TEXT NOT NULL,
        device_id TEXT NOT NULL,
        site_id TEXT,
        seq BIGINT,
        metrics JSONB NOT NULL,
        envelope_version TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS telemetry_device_time
        ON telemetry (tenant_id, device_id, time DESC)",
];
