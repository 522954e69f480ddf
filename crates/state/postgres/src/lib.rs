pub mod config;
pub mod migrations;
pub mod relational;
pub mod timeseries;

pub use config::PostgresStoreConfig;
pub use relational::PostgresRelationalStore;
pub use timeseries::PostgresTimeSeriesStore;

use pulsegrid_core::TenantId;
use pulsegrid_state::StateError;
use pulsegrid_tenancy::{TenancyConfig, TenantIsolation};

/// Connect a shared pool, ensure the application/operator roles exist, run
/// migrations, and hand back the relational and time-series stores built on
/// top of the same [`TenantIsolation`]. Callers typically run this once at
/// startup.
///
/// # Errors
///
/// Returns [`StateError::Backend`] if connecting, role creation, or
/// migrations fail.
pub async fn connect(
    tenancy_config: TenancyConfig,
) -> Result<(PostgresRelationalStore, PostgresTimeSeriesStore), StateError> {
    let migrations_config = tenancy_config.clone();
    let isolation = TenantIsolation::connect(tenancy_config)
        .await
        .map_err(|e| StateError::Backend(e.to_string()))?;

    isolation
        .ensure_roles()
        .await
        .map_err(|e| StateError::Backend(e.to_string()))?;

    migrations::run_migrations(isolation.pool(), &migrations_config)
        .await
        .map_err(|e| StateError::Backend(e.to_string()))?;

    let channel_secret_key = config::channel_secret_master_key_from_env().map_err(StateError::Backend)?;

    Ok((
        PostgresRelationalStore::new(isolation.clone(), channel_secret_key),
        PostgresTimeSeriesStore::new(isolation),
    ))
}

/// Delete telemetry and quarantine rows past their configured retention,
/// across every tenant. Runs under the operator role since it spans
/// tenants; callers are expected to invoke this periodically (e.g. a daily
/// background task), not per-request.
///
/// # Errors
///
/// Returns [`StateError::Backend`] if either delete fails.
pub async fn run_retention_sweep(
    isolation: &TenantIsolation,
    store_config: &PostgresStoreConfig,
) -> Result<(), StateError> {
    let telemetry_cutoff = chrono::Utc::now() - store_config.telemetry_retention;
    let quarantine_cutoff = chrono::Utc::now() - store_config.quarantine_retention;

    isolation
        .with_operator(move |conn| {
            Box::pin(async move {
                sqlx::query("DELETE FROM telemetry WHERE time < $1")
                    .bind(telemetry_cutoff)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                sqlx::query("DELETE FROM quarantine_events WHERE time < $1")
                    .bind(quarantine_cutoff)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                Ok(())
            })
        })
        .await
        .map_err(|e| StateError::Backend(e.to_string()))
}

/// Every distinct tenant with at least one registered device, used by the
/// evaluator's per-tick loop to discover which tenants to evaluate without
/// a dedicated tenants table (spec has no tenant-provisioning surface).
///
/// # Errors
///
/// Returns [`StateError::Backend`] if the query fails.
pub async fn list_tenant_ids(isolation: &TenantIsolation) -> Result<Vec<TenantId>, StateError> {
    isolation
        .with_operator(|conn| {
            Box::pin(async move {
                let rows: Vec<(String,)> = sqlx::query_as("SELECT DISTINCT tenant_id FROM devices")
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| pulsegrid_tenancy::TenancyError::Action(e.to_string()))?;
                Ok(rows.into_iter().map(|(id,)| TenantId::new(id)).collect())
            })
        })
        .await
        .map_err(|e| StateError::Backend(e.to_string()))
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use chrono::Utc;
    use pulsegrid_core::{Confidence, Device, DeviceId, DeviceStatus, TenantId};
    use pulsegrid_state::relational::AlertUpsertFields;
    use pulsegrid_state::{OpenOrUpdateOutcome, RelationalStore, TimeSeriesStore};

    use super::*;

    fn test_tenancy_config() -> TenancyConfig {
        let database_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set for integration tests");
        TenancyConfig {
            database_url,
            pool_size: 5,
            app_role: "pulsegrid_app".to_owned(),
            operator_role: "pulsegrid_operator".to_owned(),
            tenant_setting: "app.tenant_id".to_owned(),
        }
    }

    #[tokio::test]
    async fn upsert_and_fetch_device_roundtrips() {
        let (relational, _timeseries) = connect(test_tenancy_config()).await.unwrap();
        let tenant_id = TenantId::new(format!("it-{}", pulsegrid_core::ids::new_uuid()));
        let device = Device {
            tenant_id: tenant_id.clone(),
            device_id: DeviceId::new("sensor-1"),
            display_name: "Sensor 1".to_owned(),
            device_type: "generic".to_owned(),
            site_id: None,
            geo: None,
            status: DeviceStatus::Online,
            last_seen_at: None,
            template_id: None,
            created_at: Utc::now(),
        };

        relational.upsert_device(&device).await.unwrap();
        let fetched = relational
            .get_device(&tenant_id, &device.device_id)
            .await
            .unwrap()
            .expect("device should exist after upsert");
        assert_eq!(fetched.display_name, "Sensor 1");
    }

    #[tokio::test]
    async fn opening_same_fingerprint_twice_updates_not_duplicates() {
        let (relational, _timeseries) = connect(test_tenancy_config()).await.unwrap();
        let tenant_id = TenantId::new(format!("it-{}", pulsegrid_core::ids::new_uuid()));
        let device_id = DeviceId::new("sensor-2");
        let fields = AlertUpsertFields {
            device_id: device_id.clone(),
            site_id: None,
            severity: 3,
            confidence: Confidence::CERTAIN,
            summary: "temp_c (41.2) > 40".to_owned(),
            details: Default::default(),
            initial_next_escalation_at: None,
        };

        let first = relational
            .open_or_update_alert(&tenant_id, "fp-1", pulsegrid_core::AlertType::Threshold, fields.clone())
            .await
            .unwrap();
        assert!(matches!(first, OpenOrUpdateOutcome::Opened(_)));

        let second = relational
            .open_or_update_alert(&tenant_id, "fp-1", pulsegrid_core::AlertType::Threshold, fields)
            .await
            .unwrap();
        assert!(matches!(second, OpenOrUpdateOutcome::Updated(_)));
        assert_eq!(first.alert().alert_id, second.alert().alert_id);
    }

    #[tokio::test]
    async fn opening_alert_with_initial_escalation_persists_it() {
        let (relational, _timeseries) = connect(test_tenancy_config()).await.unwrap();
        let tenant_id = TenantId::new(format!("it-{}", pulsegrid_core::ids::new_uuid()));
        let device_id = DeviceId::new("sensor-3");
        let next_escalation_at = Utc::now() + chrono::Duration::minutes(15);
        let fields = AlertUpsertFields {
            device_id,
            site_id: None,
            severity: 3,
            confidence: Confidence::CERTAIN,
            summary: "temp_c (41.2) > 40".to_owned(),
            details: Default::default(),
            initial_next_escalation_at: Some(next_escalation_at),
        };

        let opened = relational
            .open_or_update_alert(&tenant_id, "fp-3", pulsegrid_core::AlertType::Threshold, fields.clone())
            .await
            .unwrap();
        assert_eq!(opened.alert().next_escalation_at, Some(next_escalation_at));

        // A subsequent update does not reset the already-scheduled escalation.
        let mut update_fields = fields;
        update_fields.initial_next_escalation_at = None;
        let updated = relational
            .open_or_update_alert(&tenant_id, "fp-3", pulsegrid_core::AlertType::Threshold, update_fields)
            .await
            .unwrap();
        assert_eq!(updated.alert().next_escalation_at, Some(next_escalation_at));
    }
}
