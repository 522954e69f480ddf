use std::fmt;

use serde::{Deserialize, Serialize};

/// The two JWT audiences: a tenant-scoped customer token for
/// `/customer/*`, and a cross-tenant operator token for `/operator/*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Operator,
}

impl Role {
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "customer" => Some(Self::Customer),
            "operator" => Some(Self::Operator),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Customer => write!(f, "customer"),
            Self::Operator => write!(f, "operator"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(Role::from_str_loose("Operator"), Some(Role::Operator));
        assert_eq!(Role::from_str_loose("CUSTOMER"), Some(Role::Customer));
    }

    #[test]
    fn rejects_unknown_role() {
        assert_eq!(Role::from_str_loose("superuser"), None);
    }
}
