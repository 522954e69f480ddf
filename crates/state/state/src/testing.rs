//! Conformance tests shared by every [`crate::RelationalStore`]
//! implementation: one suite exercised against both the in-memory and
//! `PostgreSQL` backends.

use chrono::Utc;
use pulsegrid_core::{
    AlertDetails, AlertType, Confidence, DeviceId, NotificationJob, TenantId,
};

use crate::relational::{AlertUpsertFields, RelationalStore};
use crate::types::{CloseOutcome, JobInsertOutcome, OpenOrUpdateOutcome};

fn upsert_fields(device_id: &DeviceId) -> AlertUpsertFields {
    AlertUpsertFields {
        device_id: device_id.clone(),
        site_id: None,
        severity: 3,
        confidence: Confidence::CERTAIN,
        summary: "temp_c (41.2) > 40".to_owned(),
        details: AlertDetails::default(),
        initial_next_escalation_at: None,
    }
}

/// Exercises the alert lifecycle and job idempotency invariants against
/// any `RelationalStore` implementation.
///
/// # Errors
///
/// Returns the first [`crate::StateError`] encountered; a passing run
/// returns `Ok(())`.
pub async fn run_relational_conformance(
    store: &dyn RelationalStore,
) -> Result<(), crate::StateError> {
    let tenant = TenantId::new(format!("conformance-{}", uuid::Uuid::new_v4()));
    let device = DeviceId::new("dev-1");
    let fingerprint = format!("RULE:r1:{device}");

    // open_or_update is idempotent: a second call with a live alert updates,
    // it does not open a second row.
    let first = store
        .open_or_update_alert(
            &tenant,
            &fingerprint,
            AlertType::Threshold,
            upsert_fields(&device),
        )
        .await?;
    assert!(matches!(first, OpenOrUpdateOutcome::Opened(_)));

    let second = store
        .open_or_update_alert(
            &tenant,
            &fingerprint,
            AlertType::Threshold,
            upsert_fields(&device),
        )
        .await?;
    assert!(matches!(second, OpenOrUpdateOutcome::Updated(_)));

    // close is a no-op once the alert is already closed.
    let closed = store.close_alert(&tenant, &fingerprint).await?;
    assert!(matches!(closed, CloseOutcome::Closed(_)));
    let closed_again = store.close_alert(&tenant, &fingerprint).await?;
    assert!(matches!(closed_again, CloseOutcome::NoOp));

    // Re-opening after a close starts a fresh lifecycle (a new Alert row,
    // not a resurrection of the closed one).
    let reopened = store
        .open_or_update_alert(
            &tenant,
            &fingerprint,
            AlertType::Threshold,
            upsert_fields(&device),
        )
        .await?;
    assert!(matches!(reopened, OpenOrUpdateOutcome::Opened(_)));

    // Job insertion is idempotent per (alert_id, channel_id, deliver_on_event).
    let job = NotificationJob::new(
        tenant.clone(),
        uuid::Uuid::new_v4().to_string(),
        reopened.alert().alert_id.clone(),
        "chan-1",
        pulsegrid_core::AlertLifecycleEvent::Opened,
    );
    let inserted = store.insert_job_if_absent(job.clone()).await?;
    assert!(matches!(inserted, JobInsertOutcome::Inserted(_)));

    let mut duplicate = job;
    duplicate.job_id = uuid::Uuid::new_v4().to_string().into();
    let duplicate_insert = store.insert_job_if_absent(duplicate).await?;
    assert!(matches!(duplicate_insert, JobInsertOutcome::AlreadyExists));

    let _ = Utc::now();
    Ok(())
}
