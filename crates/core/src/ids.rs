use std::fmt;

use serde::{Deserialize, Serialize};

/// Declares a newtype wrapper over `String` identifying one entity kind.
///
/// Distinct id types prevent passing a `DeviceId` where a `TenantId` is
/// expected at compile time.
macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

/// Generate a fresh UUID-v4 string, used by callers that mint new entity
/// ids (alerts, jobs) at creation time.
#[must_use]
pub fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

string_id!(TenantId);
string_id!(DeviceId);
string_id!(SiteId);
string_id!(RuleId);
string_id!(AlertId);
string_id!(ChannelId);
string_id!(RoutingRuleId);
string_id!(JobId);
string_id!(PolicyId);
string_id!(ScheduleId);
string_id!(TokenId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_id_types_do_not_unify() {
        let tenant = TenantId::new("t1");
        let device = DeviceId::new("t1");
        assert_eq!(tenant.as_str(), device.as_str());
        // Same string, but different types -- this would not compile if
        // swapped at a call site expecting the other type.
    }

    #[test]
    fn display_matches_inner_string() {
        let id = RuleId::from("rule-42");
        assert_eq!(id.to_string(), "rule-42");
    }

    #[test]
    fn new_uuid_produces_distinct_values() {
        assert_ne!(new_uuid(), new_uuid());
    }

    #[test]
    fn serde_roundtrip() {
        let id = AlertId::new("alert-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"alert-1\"");
        let back: AlertId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
