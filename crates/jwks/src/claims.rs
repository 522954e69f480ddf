use serde::{Deserialize, Serialize};

use crate::role::Role;

/// JWT claims validated by this crate. `tenant_id` is required for
/// `Role::Customer` tokens; operator tokens carry no tenant scope -- they
/// bypass the row-level policy via the tenant isolation substrate's
/// operator path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iss: String,
    pub exp: usize,
    pub role: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

impl Claims {
    /// Parse and validate the `role` claim, rejecting anything this
    /// deployment doesn't recognize.
    pub fn role(&self) -> Result<Role, crate::JwksError> {
        Role::from_str_loose(&self.role).ok_or_else(|| crate::JwksError::UnknownRole(self.role.clone()))
    }
}
