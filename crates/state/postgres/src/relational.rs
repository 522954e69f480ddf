use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulsegrid_core::{
    Alert, AlertDetails, AlertId, AlertLifecycleEvent, AlertRule, AlertStatus, AlertType,
    ChannelConfig, ChannelId, Confidence, DeadLetter, Device, DeviceCredential, DeviceId,
    DeviceStatus, EscalationLevel, EscalationPolicy, GeoPoint, JobId, JobStatus,
    NotificationAttempt, NotificationChannel, NotificationJob, NotificationRoutingRule,
    OnCallLayer, OnCallOverride, OnCallSchedule, PolicyId, QuarantineEvent, RejectionReason,
    RuleId, ScheduleId, SiteId, TenantId, ThresholdOperator,
};
use pulsegrid_state::relational::AlertUpsertFields;
use pulsegrid_state::{
    CloseOutcome, JobClaimOutcome, JobInsertOutcome, OpenOrUpdateOutcome, RelationalStore,
    StateError,
};
use pulsegrid_tenancy::TenantIsolation;
use sqlx::Row;
use sqlx::postgres::PgRow;
use sqlx::types::Json;

/// `PostgreSQL`-backed [`RelationalStore`]. Every method routes through
/// [`TenantIsolation::with_tenant`] so row-level security scopes the query,
/// except the handful documented on the trait as cross-tenant (credential
/// lookup before a tenant is known, the retry sweep, and attempt bookkeeping
/// keyed only by job id) which use [`TenantIsolation::with_operator`].
pub struct PostgresRelationalStore {
    isolation: TenantIsolation,
    /// Decrypts `ChannelConfig::Webhook.signing_secret` when it was stored
    /// as an `ENC[AES256-GCM,...]` envelope. `None` when
    /// `PULSEGRID_CHANNEL_SECRET_KEY` is unset -- plaintext secrets (the
    /// common case for dev/test fixtures) still round-trip either way.
    channel_secret_key: Option<pulsegrid_crypto::MasterKey>,
}

impl PostgresRelationalStore {
    #[must_use]
    pub fn new(isolation: TenantIsolation, channel_secret_key: Option<pulsegrid_crypto::MasterKey>) -> Self {
        Self { isolation, channel_secret_key }
    }
}

fn tenancy_err(err: pulsegrid_tenancy::TenancyError) -> StateError {
    StateError::Backend(err.to_string())
}

fn alert_type_to_db(t: AlertType) -> &'static str {
    match t {
        AlertType::Threshold => "threshold",
        AlertType::NoHeartbeat => "no_heartbeat",
        AlertType::NoTelemetry => "no_telemetry",
        AlertType::Anomaly => "anomaly",
    }
}

fn alert_type_from_db(s: &str) -> Result<AlertType, StateError> {
    match s {
        "threshold" => Ok(AlertType::Threshold),
        "no_heartbeat" => Ok(AlertType::NoHeartbeat),
        "no_telemetry" => Ok(AlertType::NoTelemetry),
        "anomaly" => Ok(AlertType::Anomaly),
        other => Err(StateError::Serialization(format!("unknown alert_type: {other}"))),
    }
}

fn operator_to_db(op: ThresholdOperator) -> &'static str {
    match op {
        ThresholdOperator::Gt => "gt",
        ThresholdOperator::Ge => "ge",
        ThresholdOperator::Lt => "lt",
        ThresholdOperator::Le => "le",
    }
}

fn operator_from_db(s: &str) -> Result<ThresholdOperator, StateError> {
    match s {
        "gt" => Ok(ThresholdOperator::Gt),
        "ge" => Ok(ThresholdOperator::Ge),
        "lt" => Ok(ThresholdOperator::Lt),
        "le" => Ok(ThresholdOperator::Le),
        other => Err(StateError::Serialization(format!("unknown operator: {other}"))),
    }
}

fn job_status_to_db(s: JobStatus) -> &'static str {
    match s {
        JobStatus::Pending => "pending",
        JobStatus::Processing => "processing",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
    }
}

fn job_status_from_db(s: &str) -> Result<JobStatus, StateError> {
    match s {
        "pending" => Ok(JobStatus::Pending),
        "processing" => Ok(JobStatus::Processing),
        "completed" => Ok(JobStatus::Completed),
        "failed" => Ok(JobStatus::Failed),
        other => Err(StateError::Serialization(format!("unknown job status: {other}"))),
    }
}

fn lifecycle_event_to_db(e: AlertLifecycleEvent) -> &'static str {
    match e {
        AlertLifecycleEvent::Opened => "opened",
        AlertLifecycleEvent::Acknowledged => "acknowledged",
        AlertLifecycleEvent::Closed => "closed",
        AlertLifecycleEvent::Escalated => "escalated",
    }
}

fn lifecycle_event_from_db(s: &str) -> Result<AlertLifecycleEvent, StateError> {
    match s {
        "opened" => Ok(AlertLifecycleEvent::Opened),
        "acknowledged" => Ok(AlertLifecycleEvent::Acknowledged),
        "closed" => Ok(AlertLifecycleEvent::Closed),
        "escalated" => Ok(AlertLifecycleEvent::Escalated),
        other => Err(StateError::Serialization(format!("unknown lifecycle event: {other}"))),
    }
}

fn device_from_row(row: &PgRow) -> Result<Device, StateError> {
    let lat: Option<f64> = row.try_get("geo_lat").map_err(|e| StateError::Backend(e.to_string()))?;
    let lon: Option<f64> = row.try_get("geo_lon").map_err(|e| StateError::Backend(e.to_string()))?;
    let status_str: String = row.try_get("status").map_err(|e| StateError::Backend(e.to_string()))?;
    Ok(Device {
        tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id").map_err(|e| StateError::Backend(e.to_string()))?),
        device_id: DeviceId::new(row.try_get::<String, _>("device_id").map_err(|e| StateError::Backend(e.to_string()))?),
        display_name: row.try_get("display_name").map_err(|e| StateError::Backend(e.to_string()))?,
        device_type: row.try_get("device_type").map_err(|e| StateError::Backend(e.to_string()))?,
        site_id: row
            .try_get::<Option<String>, _>("site_id")
            .map_err(|e| StateError::Backend(e.to_string()))?
            .map(SiteId::new),
        geo: lat.zip(lon).map(|(lat, lon)| GeoPoint { lat, lon }),
        status: status_str.parse::<DeviceStatus>().map_err(StateError::Serialization)?,
        last_seen_at: row.try_get("last_seen_at").map_err(|e| StateError::Backend(e.to_string()))?,
        template_id: row.try_get("template_id").map_err(|e| StateError::Backend(e.to_string()))?,
        created_at: row.try_get("created_at").map_err(|e| StateError::Backend(e.to_string()))?,
    })
}

fn credential_from_row(row: &PgRow) -> Result<DeviceCredential, StateError> {
    Ok(DeviceCredential {
        tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id").map_err(|e| StateError::Backend(e.to_string()))?),
        device_id: DeviceId::new(row.try_get::<String, _>("device_id").map_err(|e| StateError::Backend(e.to_string()))?),
        token_id: row.try_get::<String, _>("token_id").map_err(|e| StateError::Backend(e.to_string()))?.into(),
        client_id: row.try_get("client_id").map_err(|e| StateError::Backend(e.to_string()))?,
        secret_hash: row.try_get("secret_hash").map_err(|e| StateError::Backend(e.to_string()))?,
        issued_at: row.try_get("issued_at").map_err(|e| StateError::Backend(e.to_string()))?,
        revoked_at: row.try_get("revoked_at").map_err(|e| StateError::Backend(e.to_string()))?,
    })
}

fn rule_from_row(row: &PgRow) -> Result<AlertRule, StateError> {
    let operator: String = row.try_get("operator").map_err(|e| StateError::Backend(e.to_string()))?;
    let site_ids: Option<Json<Vec<SiteId>>> =
        row.try_get("site_ids").map_err(|e| StateError::Backend(e.to_string()))?;
    Ok(AlertRule {
        tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id").map_err(|e| StateError::Backend(e.to_string()))?),
        rule_id: row.try_get::<String, _>("rule_id").map_err(|e| StateError::Backend(e.to_string()))?.into(),
        name: row.try_get("name").map_err(|e| StateError::Backend(e.to_string()))?,
        metric_name: row.try_get("metric_name").map_err(|e| StateError::Backend(e.to_string()))?,
        operator: operator_from_db(&operator)?,
        threshold: row.try_get("threshold").map_err(|e| StateError::Backend(e.to_string()))?,
        severity: row.try_get::<i16, _>("severity").map_err(|e| StateError::Backend(e.to_string()))? as u8,
        duration_seconds: row.try_get::<i64, _>("duration_seconds").map_err(|e| StateError::Backend(e.to_string()))? as u64,
        site_ids: site_ids.map(|j| j.0),
        enabled: row.try_get("enabled").map_err(|e| StateError::Backend(e.to_string()))?,
        escalation_policy_id: row
            .try_get::<Option<String>, _>("escalation_policy_id")
            .map_err(|e| StateError::Backend(e.to_string()))?
            .map(PolicyId::new),
        updated_at: row.try_get("updated_at").map_err(|e| StateError::Backend(e.to_string()))?,
    })
}

fn alert_from_row(row: &PgRow) -> Result<Alert, StateError> {
    let alert_type: String = row.try_get("alert_type").map_err(|e| StateError::Backend(e.to_string()))?;
    let status: String = row.try_get("status").map_err(|e| StateError::Backend(e.to_string()))?;
    let details: Json<AlertDetails> = row.try_get("details").map_err(|e| StateError::Backend(e.to_string()))?;
    Ok(Alert {
        tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id").map_err(|e| StateError::Backend(e.to_string()))?),
        alert_id: row.try_get::<String, _>("alert_id").map_err(|e| StateError::Backend(e.to_string()))?.into(),
        device_id: DeviceId::new(row.try_get::<String, _>("device_id").map_err(|e| StateError::Backend(e.to_string()))?),
        site_id: row
            .try_get::<Option<String>, _>("site_id")
            .map_err(|e| StateError::Backend(e.to_string()))?
            .map(SiteId::new),
        alert_type: alert_type_from_db(&alert_type)?,
        fingerprint: row.try_get("fingerprint").map_err(|e| StateError::Backend(e.to_string()))?,
        status: status.parse::<AlertStatus>().map_err(StateError::Serialization)?,
        severity: row.try_get::<i16, _>("severity").map_err(|e| StateError::Backend(e.to_string()))? as u8,
        confidence: Confidence::new(row.try_get("confidence").map_err(|e| StateError::Backend(e.to_string()))?)
            .map_err(|e| StateError::Serialization(e.to_string()))?,
        summary: row.try_get("summary").map_err(|e| StateError::Backend(e.to_string()))?,
        details: details.0,
        escalation_level: row.try_get::<i32, _>("escalation_level").map_err(|e| StateError::Backend(e.to_string()))? as u32,
        next_escalation_at: row.try_get("next_escalation_at").map_err(|e| StateError::Backend(e.to_string()))?,
        opened_at: row.try_get("opened_at").map_err(|e| StateError::Backend(e.to_string()))?,
        closed_at: row.try_get("closed_at").map_err(|e| StateError::Backend(e.to_string()))?,
    })
}

fn policy_from_row(row: &PgRow) -> Result<EscalationPolicy, StateError> {
    let levels: Json<Vec<EscalationLevel>> =
        row.try_get("levels").map_err(|e| StateError::Backend(e.to_string()))?;
    Ok(EscalationPolicy {
        policy_id: row.try_get::<String, _>("policy_id").map_err(|e| StateError::Backend(e.to_string()))?.into(),
        name: row.try_get("name").map_err(|e| StateError::Backend(e.to_string()))?,
        levels: levels.0,
    })
}

fn schedule_from_row(row: &PgRow) -> Result<OnCallSchedule, StateError> {
    let layers: Json<Vec<OnCallLayer>> = row.try_get("layers").map_err(|e| StateError::Backend(e.to_string()))?;
    let overrides: Json<Vec<OnCallOverride>> =
        row.try_get("overrides").map_err(|e| StateError::Backend(e.to_string()))?;
    Ok(OnCallSchedule {
        schedule_id: row.try_get::<String, _>("schedule_id").map_err(|e| StateError::Backend(e.to_string()))?.into(),
        name: row.try_get("name").map_err(|e| StateError::Backend(e.to_string()))?,
        timezone: row.try_get("timezone").map_err(|e| StateError::Backend(e.to_string()))?,
        layers: layers.0,
        overrides: overrides.0,
    })
}

/// Decrypt `signing_secret` in place if it was persisted as an
/// `ENC[AES256-GCM,...]` envelope. Plaintext secrets (no envelope marker)
/// pass through unchanged, so fixtures and deployments without
/// `PULSEGRID_CHANNEL_SECRET_KEY` configured still work.
fn decrypt_channel_config(config: ChannelConfig, key: Option<&pulsegrid_crypto::MasterKey>) -> Result<ChannelConfig, StateError> {
    match config {
        ChannelConfig::Webhook { url, signing_secret, headers } if pulsegrid_crypto::is_encrypted(&signing_secret) => {
            let key = key.ok_or_else(|| {
                StateError::Backend("channel signing_secret is encrypted but PULSEGRID_CHANNEL_SECRET_KEY is not configured".to_owned())
            })?;
            let plaintext = pulsegrid_crypto::decrypt_value(&signing_secret, key)
                .map_err(|e| StateError::Backend(format!("failed to decrypt channel signing_secret: {e}")))?;
            Ok(ChannelConfig::Webhook {
                url,
                signing_secret: pulsegrid_crypto::ExposeSecret::expose_secret(&plaintext).clone(),
                headers,
            })
        }
        other => Ok(other),
    }
}

fn channel_from_row(row: &PgRow, channel_secret_key: Option<&pulsegrid_crypto::MasterKey>) -> Result<NotificationChannel, StateError> {
    let config: Json<ChannelConfig> = row.try_get("config").map_err(|e| StateError::Backend(e.to_string()))?;
    Ok(NotificationChannel {
        tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id").map_err(|e| StateError::Backend(e.to_string()))?),
        channel_id: row.try_get::<String, _>("channel_id").map_err(|e| StateError::Backend(e.to_string()))?.into(),
        config: decrypt_channel_config(config.0, channel_secret_key)?,
        is_enabled: row.try_get("is_enabled").map_err(|e| StateError::Backend(e.to_string()))?,
    })
}

fn routing_rule_from_row(row: &PgRow) -> Result<NotificationRoutingRule, StateError> {
    let alert_type: Option<String> = row.try_get("alert_type").map_err(|e| StateError::Backend(e.to_string()))?;
    let site_ids: Option<Json<Vec<SiteId>>> =
        row.try_get("site_ids").map_err(|e| StateError::Backend(e.to_string()))?;
    let device_prefixes: Option<Json<Vec<String>>> =
        row.try_get("device_prefixes").map_err(|e| StateError::Backend(e.to_string()))?;
    let deliver_on: Vec<String> = row
        .try_get::<Json<Vec<String>>, _>("deliver_on")
        .map_err(|e| StateError::Backend(e.to_string()))?
        .0;
    Ok(NotificationRoutingRule {
        tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id").map_err(|e| StateError::Backend(e.to_string()))?),
        rule_id: row.try_get::<String, _>("rule_id").map_err(|e| StateError::Backend(e.to_string()))?.into(),
        channel_id: row.try_get::<String, _>("channel_id").map_err(|e| StateError::Backend(e.to_string()))?.into(),
        min_severity: row.try_get::<i16, _>("min_severity").map_err(|e| StateError::Backend(e.to_string()))? as u8,
        alert_type: alert_type.map(|s| alert_type_from_db(&s)).transpose()?,
        site_ids: site_ids.map(|j| j.0),
        device_prefixes: device_prefixes.map(|j| j.0),
        deliver_on: deliver_on
            .iter()
            .map(|s| lifecycle_event_from_db(s))
            .collect::<Result<Vec<_>, _>>()?,
        priority: row.try_get("priority").map_err(|e| StateError::Backend(e.to_string()))?,
        enabled: row.try_get("enabled").map_err(|e| StateError::Backend(e.to_string()))?,
        created_at: row.try_get("created_at").map_err(|e| StateError::Backend(e.to_string()))?,
    })
}

fn job_from_row(row: &PgRow) -> Result<NotificationJob, StateError> {
    let deliver_on_event: String =
        row.try_get("deliver_on_event").map_err(|e| StateError::Backend(e.to_string()))?;
    let status: String = row.try_get("status").map_err(|e| StateError::Backend(e.to_string()))?;
    Ok(NotificationJob {
        tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id").map_err(|e| StateError::Backend(e.to_string()))?),
        job_id: row.try_get::<String, _>("job_id").map_err(|e| StateError::Backend(e.to_string()))?.into(),
        alert_id: row.try_get::<String, _>("alert_id").map_err(|e| StateError::Backend(e.to_string()))?.into(),
        channel_id: row.try_get::<String, _>("channel_id").map_err(|e| StateError::Backend(e.to_string()))?.into(),
        deliver_on_event: lifecycle_event_from_db(&deliver_on_event)?,
        status: job_status_from_db(&status)?,
        attempts: row.try_get::<i32, _>("attempts").map_err(|e| StateError::Backend(e.to_string()))? as u32,
        last_error: row.try_get("last_error").map_err(|e| StateError::Backend(e.to_string()))?,
        next_attempt_at: row.try_get("next_attempt_at").map_err(|e| StateError::Backend(e.to_string()))?,
        created_at: row.try_get("created_at").map_err(|e| StateError::Backend(e.to_string()))?,
        resolved_target_email: row.try_get("resolved_target_email").map_err(|e| StateError::Backend(e.to_string()))?,
    })
}

#[async_trait]
impl RelationalStore for PostgresRelationalStore {
    async fn upsert_device(&self, device: &Device) -> Result<(), StateError> {
        let device = device.clone();
        self.isolation
            .with_tenant(&device.tenant_id.clone(), move |conn| {
                Box::pin(async move {
                    sqlx::query(
                        "INSERT INTO devices (tenant_id, device_id, display_name, device_type, site_id, geo_lat, geo_lon, status, last_seen_at, template_id, created_at)
                         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
                         ON CONFLICT (tenant_id, device_id) DO UPDATE SET
                           display_name = EXCLUDED.display_name,
                           device_type = EXCLUDED.device_type,
                           site_id = EXCLUDED.site_id,
                           geo_lat = EXCLUDED.geo_lat,
                           geo_lon = EXCLUDED.geo_lon,
                           status = EXCLUDED.status,
                           template_id = EXCLUDED.template_id",
                    )
                    .bind(device.tenant_id.as_str())
                    .bind(device.device_id.as_str())
                    .bind(&device.display_name)
                    .bind(&device.device_type)
                    .bind(device.site_id.as_ref().map(SiteId::as_str))
                    .bind(device.geo.map(|g| g.lat))
                    .bind(device.geo.map(|g| g.lon))
                    .bind(device.status.to_string())
                    .bind(device.last_seen_at)
                    .bind(device.template_id.as_deref())
                    .bind(device.created_at)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    Ok(())
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn get_device(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
    ) -> Result<Option<Device>, StateError> {
        let device_id = device_id.clone();
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    let row = sqlx::query("SELECT * FROM devices WHERE tenant_id = current_setting('app.tenant_id', true) AND device_id = $1")
                        .bind(device_id.as_str())
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    row.as_ref()
                        .map(device_from_row)
                        .transpose()
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn record_heartbeat(
        &self,
        tenant_id: &TenantId,
        device_id: &DeviceId,
        seen_at: DateTime<Utc>,
    ) -> Result<(), StateError> {
        let device_id = device_id.clone();
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    sqlx::query(
                        "UPDATE devices SET last_seen_at = $1, status = CASE WHEN status = 'decommissioned' THEN status ELSE 'online' END
                         WHERE tenant_id = current_setting('app.tenant_id', true) AND device_id = $2",
                    )
                    .bind(seen_at)
                    .bind(device_id.as_str())
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    Ok(())
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn insert_credential(&self, credential: &DeviceCredential) -> Result<(), StateError> {
        let credential = credential.clone();
        self.isolation
            .with_tenant(&credential.tenant_id.clone(), move |conn| {
                Box::pin(async move {
                    sqlx::query(
                        "INSERT INTO device_credentials (tenant_id, device_id, token_id, client_id, secret_hash, issued_at, revoked_at)
                         VALUES ($1,$2,$3,$4,$5,$6,$7)",
                    )
                    .bind(credential.tenant_id.as_str())
                    .bind(credential.device_id.as_str())
                    .bind(credential.token_id.as_str())
                    .bind(&credential.client_id)
                    .bind(&credential.secret_hash)
                    .bind(credential.issued_at)
                    .bind(credential.revoked_at)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    Ok(())
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn find_active_credential(
        &self,
        client_id: &str,
    ) -> Result<Option<DeviceCredential>, StateError> {
        let client_id = client_id.to_owned();
        self.isolation
            .with_operator(move |conn| {
                Box::pin(async move {
                    let row = sqlx::query(
                        "SELECT * FROM device_credentials WHERE client_id = $1 AND revoked_at IS NULL",
                    )
                    .bind(&client_id)
                    .fetch_optional(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    row.as_ref()
                        .map(credential_from_row)
                        .transpose()
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn enabled_rules(&self, tenant_id: &TenantId) -> Result<Vec<AlertRule>, StateError> {
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    let rows = sqlx::query(
                        "SELECT * FROM alert_rules WHERE tenant_id = current_setting('app.tenant_id', true) AND enabled",
                    )
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    rows.iter()
                        .map(rule_from_row)
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn get_rule(
        &self,
        tenant_id: &TenantId,
        rule_id: &RuleId,
    ) -> Result<Option<AlertRule>, StateError> {
        let rule_id = rule_id.clone();
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    let row = sqlx::query("SELECT * FROM alert_rules WHERE tenant_id = current_setting('app.tenant_id', true) AND rule_id = $1")
                        .bind(rule_id.as_str())
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    row.as_ref()
                        .map(rule_from_row)
                        .transpose()
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn open_or_update_alert(
        &self,
        tenant_id: &TenantId,
        fingerprint: &str,
        alert_type: AlertType,
        fields: AlertUpsertFields,
    ) -> Result<OpenOrUpdateOutcome, StateError> {
        let fingerprint = fingerprint.to_owned();
        let new_alert_id = pulsegrid_core::ids::new_uuid();
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    let row = sqlx::query(
                        "INSERT INTO alerts (tenant_id, alert_id, device_id, site_id, alert_type, fingerprint, status, severity, confidence, summary, details, escalation_level, next_escalation_at, opened_at, closed_at)
                         VALUES (current_setting('app.tenant_id', true), $1, $2, $3, $4, $5, 'open', $6, $7, $8, $9, 0, $10, now(), NULL)
                         ON CONFLICT (tenant_id, fingerprint) WHERE status IN ('open', 'acknowledged')
                         DO UPDATE SET severity = $6, confidence = $7, summary = $8, details = $9, site_id = $3
                         RETURNING *, (xmax = 0) AS inserted",
                    )
                    .bind(&new_alert_id)
                    .bind(fields.device_id.as_str())
                    .bind(fields.site_id.as_ref().map(SiteId::as_str))
                    .bind(alert_type_to_db(alert_type))
                    .bind(&fingerprint)
                    .bind(i16::from(fields.severity))
                    .bind(fields.confidence.value())
                    .bind(&fields.summary)
                    .bind(Json(&fields.details))
                    .bind(fields.initial_next_escalation_at)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;

                    let was_inserted: bool = row
                        .try_get("inserted")
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    let alert = alert_from_row(&row)
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    Ok(if was_inserted {
                        OpenOrUpdateOutcome::Opened(alert)
                    } else {
                        OpenOrUpdateOutcome::Updated(alert)
                    })
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn close_alert(
        &self,
        tenant_id: &TenantId,
        fingerprint: &str,
    ) -> Result<CloseOutcome, StateError> {
        let fingerprint = fingerprint.to_owned();
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    let row = sqlx::query(
                        "UPDATE alerts SET status = 'closed', closed_at = now()
                         WHERE tenant_id = current_setting('app.tenant_id', true) AND fingerprint = $1 AND status IN ('open', 'acknowledged')
                         RETURNING *",
                    )
                    .bind(&fingerprint)
                    .fetch_optional(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;

                    match row {
                        None => Ok(CloseOutcome::NoOp),
                        Some(row) => {
                            let alert = alert_from_row(&row)
                                .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                            Ok(CloseOutcome::Closed(alert))
                        }
                    }
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn acknowledge_alert(
        &self,
        tenant_id: &TenantId,
        alert_id: &AlertId,
    ) -> Result<Option<Alert>, StateError> {
        let alert_id = alert_id.clone();
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    let row = sqlx::query(
                        "UPDATE alerts SET status = CASE WHEN status = 'open' THEN 'acknowledged' ELSE status END
                         WHERE tenant_id = current_setting('app.tenant_id', true) AND alert_id = $1
                         RETURNING *",
                    )
                    .bind(alert_id.as_str())
                    .fetch_optional(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    row.as_ref()
                        .map(alert_from_row)
                        .transpose()
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn get_alert(
        &self,
        tenant_id: &TenantId,
        alert_id: &AlertId,
    ) -> Result<Option<Alert>, StateError> {
        let alert_id = alert_id.clone();
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    let row = sqlx::query(
                        "SELECT * FROM alerts
                         WHERE tenant_id = current_setting('app.tenant_id', true) AND alert_id = $1",
                    )
                    .bind(alert_id.as_str())
                    .fetch_optional(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    row.as_ref()
                        .map(alert_from_row)
                        .transpose()
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn advance_escalation(
        &self,
        tenant_id: &TenantId,
        alert_id: &AlertId,
        new_level: u32,
        next_escalation_at: Option<DateTime<Utc>>,
    ) -> Result<Alert, StateError> {
        let alert_id = alert_id.clone();
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    let row = sqlx::query(
                        "UPDATE alerts SET escalation_level = $1, next_escalation_at = $2
                         WHERE tenant_id = current_setting('app.tenant_id', true) AND alert_id = $3
                         RETURNING *",
                    )
                    .bind(new_level as i32)
                    .bind(next_escalation_at)
                    .bind(alert_id.as_str())
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    alert_from_row(&row).map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn alerts_due_for_escalation(
        &self,
        tenant_id: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Alert, PolicyId)>, StateError> {
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    let rows = sqlx::query(
                        "SELECT a.*, r.escalation_policy_id AS joined_policy_id
                         FROM alerts a
                         JOIN alert_rules r ON r.tenant_id = a.tenant_id AND r.rule_id = a.details->>'rule_id'
                         WHERE a.tenant_id = current_setting('app.tenant_id', true)
                           AND a.status IN ('open', 'acknowledged')
                           AND a.next_escalation_at IS NOT NULL
                           AND a.next_escalation_at <= $1
                           AND r.escalation_policy_id IS NOT NULL",
                    )
                    .bind(now)
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;

                    rows.iter()
                        .map(|row| {
                            let alert = alert_from_row(row)?;
                            let policy_id: String = row
                                .try_get("joined_policy_id")
                                .map_err(|e| StateError::Backend(e.to_string()))?;
                            Ok((alert, PolicyId::new(policy_id)))
                        })
                        .collect::<Result<Vec<_>, StateError>>()
                        .map_err(|e: StateError| pulsegrid_tenancy::TenancyError::Action(e.to_string()))
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn get_escalation_policy(
        &self,
        tenant_id: &TenantId,
        policy_id: &PolicyId,
    ) -> Result<Option<EscalationPolicy>, StateError> {
        let policy_id = policy_id.clone();
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    let row = sqlx::query("SELECT * FROM escalation_policies WHERE tenant_id = current_setting('app.tenant_id', true) AND policy_id = $1")
                        .bind(policy_id.as_str())
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    row.as_ref()
                        .map(policy_from_row)
                        .transpose()
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn get_oncall_schedule(
        &self,
        tenant_id: &TenantId,
        schedule_id: &ScheduleId,
    ) -> Result<Option<OnCallSchedule>, StateError> {
        let schedule_id = schedule_id.clone();
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    let row = sqlx::query("SELECT * FROM oncall_schedules WHERE tenant_id = current_setting('app.tenant_id', true) AND schedule_id = $1")
                        .bind(schedule_id.as_str())
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    row.as_ref()
                        .map(schedule_from_row)
                        .transpose()
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn get_channel(
        &self,
        tenant_id: &TenantId,
        channel_id: &ChannelId,
    ) -> Result<Option<NotificationChannel>, StateError> {
        let channel_id = channel_id.clone();
        let channel_secret_key = self.channel_secret_key.clone();
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    let row = sqlx::query("SELECT * FROM notification_channels WHERE tenant_id = current_setting('app.tenant_id', true) AND channel_id = $1")
                        .bind(channel_id.as_str())
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    row.as_ref()
                        .map(|row| channel_from_row(row, channel_secret_key.as_ref()))
                        .transpose()
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn enabled_routing_rules(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<NotificationRoutingRule>, StateError> {
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    let rows = sqlx::query(
                        "SELECT * FROM notification_routing_rules
                         WHERE tenant_id = current_setting('app.tenant_id', true) AND enabled
                         ORDER BY priority ASC, created_at ASC",
                    )
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    rows.iter()
                        .map(routing_rule_from_row)
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn insert_job_if_absent(
        &self,
        job: NotificationJob,
    ) -> Result<JobInsertOutcome, StateError> {
        let job_for_tenant = job.clone();
        self.isolation
            .with_tenant(&job_for_tenant.tenant_id.clone(), move |conn| {
                Box::pin(async move {
                    let row = sqlx::query(
                        "INSERT INTO notification_jobs (tenant_id, job_id, alert_id, channel_id, deliver_on_event, status, attempts, last_error, next_attempt_at, created_at, resolved_target_email)
                         VALUES (current_setting('app.tenant_id', true), $1,$2,$3,$4,'pending',0,NULL,NULL,$5,$6)
                         ON CONFLICT (tenant_id, alert_id, channel_id, deliver_on_event) DO NOTHING
                         RETURNING job_id",
                    )
                    .bind(job.job_id.as_str())
                    .bind(job.alert_id.as_str())
                    .bind(job.channel_id.as_str())
                    .bind(lifecycle_event_to_db(job.deliver_on_event))
                    .bind(job.created_at)
                    .bind(&job.resolved_target_email)
                    .fetch_optional(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;

                    Ok(match row {
                        Some(_) => JobInsertOutcome::Inserted(job),
                        None => JobInsertOutcome::AlreadyExists,
                    })
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn get_job(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
    ) -> Result<Option<NotificationJob>, StateError> {
        let job_id = job_id.clone();
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    let row = sqlx::query("SELECT * FROM notification_jobs WHERE tenant_id = current_setting('app.tenant_id', true) AND job_id = $1")
                        .bind(job_id.as_str())
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    row.as_ref()
                        .map(job_from_row)
                        .transpose()
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn claim_job(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
    ) -> Result<JobClaimOutcome, StateError> {
        let job_id = job_id.clone();
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    let claimed = sqlx::query(
                        "UPDATE notification_jobs SET status = 'processing'
                         WHERE tenant_id = current_setting('app.tenant_id', true) AND job_id = $1 AND status = 'pending'
                         RETURNING *",
                    )
                    .bind(job_id.as_str())
                    .fetch_optional(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;

                    if let Some(row) = claimed {
                        let job = job_from_row(&row)
                            .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                        return Ok(JobClaimOutcome::Claimed(job));
                    }

                    let exists = sqlx::query("SELECT 1 FROM notification_jobs WHERE tenant_id = current_setting('app.tenant_id', true) AND job_id = $1")
                        .bind(job_id.as_str())
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    Ok(if exists.is_some() {
                        JobClaimOutcome::NotClaimable
                    } else {
                        JobClaimOutcome::NotFound
                    })
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn mark_job_completed(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
    ) -> Result<(), StateError> {
        let job_id = job_id.clone();
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    let result = sqlx::query(
                        "UPDATE notification_jobs SET status = 'completed'
                         WHERE tenant_id = current_setting('app.tenant_id', true) AND job_id = $1",
                    )
                    .bind(job_id.as_str())
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    if result.rows_affected() == 0 {
                        return Err(pulsegrid_tenancy::TenancyError::Action(StateError::NotFound.to_string()));
                    }
                    Ok(())
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn reschedule_job(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<NotificationJob, StateError> {
        let job_id = job_id.clone();
        let error = error.to_owned();
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    let row = sqlx::query(
                        "UPDATE notification_jobs
                         SET attempts = attempts + 1, status = 'pending', last_error = $1, next_attempt_at = $2
                         WHERE tenant_id = current_setting('app.tenant_id', true) AND job_id = $3
                         RETURNING *",
                    )
                    .bind(&error)
                    .bind(next_attempt_at)
                    .bind(job_id.as_str())
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    job_from_row(&row).map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn mark_job_failed(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
        error: &str,
    ) -> Result<NotificationJob, StateError> {
        let job_id = job_id.clone();
        let error = error.to_owned();
        self.isolation
            .with_tenant(tenant_id, move |conn| {
                Box::pin(async move {
                    let row = sqlx::query(
                        "UPDATE notification_jobs SET status = 'failed', last_error = $1
                         WHERE tenant_id = current_setting('app.tenant_id', true) AND job_id = $2
                         RETURNING *",
                    )
                    .bind(&error)
                    .bind(job_id.as_str())
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    job_from_row(&row).map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn jobs_due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<NotificationJob>, StateError> {
        self.isolation
            .with_operator(move |conn| {
                Box::pin(async move {
                    let rows = sqlx::query(
                        "SELECT * FROM notification_jobs
                         WHERE status = 'pending' AND next_attempt_at IS NOT NULL AND next_attempt_at <= $1
                         ORDER BY next_attempt_at ASC
                         LIMIT $2",
                    )
                    .bind(now)
                    .bind(i64::from(limit))
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    rows.iter()
                        .map(job_from_row)
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn record_attempt(&self, attempt: &NotificationAttempt) -> Result<(), StateError> {
        let attempt = attempt.clone();
        self.isolation
            .with_operator(move |conn| {
                Box::pin(async move {
                    sqlx::query(
                        "INSERT INTO notification_attempts (job_id, attempt_no, ok, transport_status, latency_ms, error, at)
                         VALUES ($1,$2,$3,$4,$5,$6,$7)",
                    )
                    .bind(attempt.job_id.as_str())
                    .bind(attempt.attempt_no as i32)
                    .bind(attempt.ok)
                    .bind(&attempt.transport_status)
                    .bind(attempt.latency.as_millis() as i64)
                    .bind(&attempt.error)
                    .bind(attempt.at)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    Ok(())
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn next_attempt_no(
        &self,
        _tenant_id: &TenantId,
        job_id: &JobId,
    ) -> Result<u32, StateError> {
        let job_id = job_id.clone();
        self.isolation
            .with_operator(move |conn| {
                Box::pin(async move {
                    let row = sqlx::query("SELECT COUNT(*) AS n FROM notification_attempts WHERE job_id = $1")
                        .bind(job_id.as_str())
                        .fetch_one(&mut *conn)
                        .await
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    let count: i64 = row
                        .try_get("n")
                        .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    Ok(count as u32 + 1)
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn insert_dead_letter(&self, dead_letter: &DeadLetter) -> Result<(), StateError> {
        let dead_letter = dead_letter.clone();
        self.isolation
            .with_tenant(&dead_letter.tenant_id.clone(), move |conn| {
                Box::pin(async move {
                    sqlx::query(
                        "INSERT INTO dead_letters (tenant_id, job_id, alert_id, channel_id, attempts, final_error, created_at, replayed_at)
                         VALUES (current_setting('app.tenant_id', true), $1,$2,$3,$4,$5,$6,$7)",
                    )
                    .bind(dead_letter.job_id.as_str())
                    .bind(dead_letter.alert_id.as_str())
                    .bind(dead_letter.channel_id.as_str())
                    .bind(dead_letter.attempts as i32)
                    .bind(&dead_letter.final_error)
                    .bind(dead_letter.created_at)
                    .bind(dead_letter.replayed_at)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    Ok(())
                })
            })
            .await
            .map_err(tenancy_err)
    }

    async fn insert_quarantine_event(&self, event: &QuarantineEvent) -> Result<(), StateError> {
        let event = event.clone();
        self.isolation
            .with_tenant(&event.tenant_id.clone(), move |conn| {
                Box::pin(async move {
                    let seq = match &event.reason {
                        RejectionReason::DuplicateSeq { seq } => Some(*seq as i64),
                        _ => None,
                    };
                    sqlx::query(
                        "INSERT INTO quarantine_events (time, tenant_id, device_id, topic, reason_code, reason, payload, envelope_version, seq)
                         VALUES ($1, current_setting('app.tenant_id', true), $2, $3, $4, $5, $6, $7, $8)",
                    )
                    .bind(event.time)
                    .bind(event.device_id.as_str())
                    .bind(&event.topic)
                    .bind(event.reason.code())
                    .bind(Json(&event.reason))
                    .bind(&event.payload)
                    .bind(&event.envelope_version)
                    .bind(seq)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                    Ok(())
                })
            })
            .await
            .map_err(tenancy_err)
    }
}
