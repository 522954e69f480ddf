use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordVerifier};
use pulsegrid_core::{DeviceId, TenantId};
use pulsegrid_state::RelationalStore;

/// The tenant/device pair an ingest connection authenticated as, derived
/// from the credential (HTTP bearer/provision token) or the MQTT topic --
/// never carried in the envelope body itself.
#[derive(Debug, Clone)]
pub struct AuthenticatedDevice {
    pub tenant_id: TenantId,
    pub device_id: DeviceId,
}

/// Verify `candidate` against the stored argon2 hash for `client_id`,
/// returning the tenant/device the credential authenticates as.
///
/// # Errors
///
/// Returns `Ok(None)` (not `Err`) for any authentication failure -- unknown
/// client, revoked credential, or wrong secret -- since the caller maps all
/// three to the same `bad_credentials`/`unknown_device` rejection reasons
/// without distinguishing which failed, to avoid leaking which part of the
/// identifier space is valid.
pub async fn authenticate(
    store: &dyn RelationalStore,
    client_id: &str,
    candidate_secret: &str,
) -> Result<Option<AuthenticatedDevice>, pulsegrid_state::StateError> {
    let Some(credential) = store.find_active_credential(client_id).await? else {
        return Ok(None);
    };
    if !credential.is_active() || !verify_secret(&credential.secret_hash, candidate_secret) {
        return Ok(None);
    }
    Ok(Some(AuthenticatedDevice {
        tenant_id: credential.tenant_id,
        device_id: credential.device_id,
    }))
}

fn verify_secret(hash: &str, candidate: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default().verify_password(candidate.as_bytes(), &parsed).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_secret("not-a-hash", "anything"));
    }
}
