//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different ID types (e.g., using a
//! DestinationId where a CallId is expected) and make the code more
//! self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A provider-assigned call identifier (e.g., `CA3f9e…` for Twilio-style
/// providers). Opaque to this service; never parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub String);

impl CallId {
    pub fn new(s: impl Into<String>) -> Self {
        CallId(s.into())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CallId {
    fn from(s: String) -> Self {
        CallId(s)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        CallId(s.to_string())
    }
}

/// A notification delivery target (chat id, channel id, …). Opaque: the
/// delivery channel is the only component that interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(pub String);

impl DestinationId {
    pub fn new(s: impl Into<String>) -> Self {
        DestinationId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DestinationId {
    fn from(s: String) -> Self {
        DestinationId(s)
    }
}

impl From<&str> for DestinationId {
    fn from(s: &str) -> Self {
        DestinationId(s.to_string())
    }
}

/// A store-assigned notification record ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub u64);

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NotificationId {
    fn from(n: u64) -> Self {
        NotificationId(n)
    }
}

/// A stage key, unique within one call's flow configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageKey(pub String);

impl StageKey {
    pub fn new(s: impl Into<String>) -> Self {
        StageKey(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StageKey {
    fn from(s: &str) -> Self {
        StageKey(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod call_id {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn serde_roundtrip(s in "[A-Za-z0-9]{1,64}") {
                let id = CallId::new(&s);
                let json = serde_json::to_string(&id).unwrap();
                let parsed: CallId = serde_json::from_str(&json).unwrap();
                prop_assert_eq!(id, parsed);
            }

            #[test]
            fn display_matches_inner(s in "[A-Za-z0-9]{1,64}") {
                let id = CallId::new(&s);
                prop_assert_eq!(format!("{}", id), s);
            }

            #[test]
            fn comparison_matches_underlying(a in "[A-Za-z0-9]{1,16}", b in "[A-Za-z0-9]{1,16}") {
                let id_a = CallId::new(&a);
                let id_b = CallId::new(&b);
                prop_assert_eq!(id_a == id_b, a == b);
            }
        }
    }

    mod notification_id {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn serde_roundtrip(n: u64) {
                let id = NotificationId(n);
                let json = serde_json::to_string(&id).unwrap();
                let parsed: NotificationId = serde_json::from_str(&json).unwrap();
                prop_assert_eq!(id, parsed);
            }
        }
    }

    mod stage_key {
        use super::*;

        #[test]
        fn transparent_serde() {
            let key = StageKey::new("account_number");
            let json = serde_json::to_string(&key).unwrap();
            assert_eq!(json, "\"account_number\"");
        }
    }
}
