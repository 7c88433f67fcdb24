//! Record identity: persistent (remote-assigned) or temporary (local placeholder).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix used for locally generated placeholder identities.
pub const TEMP_PREFIX: &str = "tmp-";

/// The identity of a record.
///
/// A record carries exactly one identity. Records created locally start with a
/// [`Identity::Temporary`] placeholder which is replaced by the
/// [`Identity::Persistent`] value returned from the first successful remote
/// insert. Temporary identities never leave the process.
///
/// On the wire a persistent identity is a JSON integer and a temporary one is a
/// JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identity {
    /// Assigned by the remote store.
    Persistent(i64),
    /// Generated locally, unique within the session.
    Temporary(String),
}

impl Identity {
    /// Build the temporary identity for a local sequence number.
    pub fn temporary(seq: u64) -> Self {
        Identity::Temporary(format!("{TEMP_PREFIX}{seq}"))
    }

    /// Parse an identity from user or URL input.
    ///
    /// Integral input is persistent, anything else non-empty is temporary.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        Some(match raw.parse::<i64>() {
            Ok(id) => Identity::Persistent(id),
            Err(_) => Identity::Temporary(raw.to_string()),
        })
    }

    /// Check if this identity is a local placeholder.
    pub fn is_temporary(&self) -> bool {
        matches!(self, Identity::Temporary(_))
    }

    /// The remote-assigned identity, if any.
    pub fn as_persistent(&self) -> Option<i64> {
        match self {
            Identity::Persistent(id) => Some(*id),
            Identity::Temporary(_) => None,
        }
    }
}

impl From<i64> for Identity {
    fn from(id: i64) -> Self {
        Identity::Persistent(id)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Persistent(id) => write!(f, "{id}"),
            Identity::Temporary(tag) => write!(f, "{tag}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_identity() {
        let id = Identity::temporary(3);
        assert_eq!(id, Identity::Temporary("tmp-3".into()));
        assert!(id.is_temporary());
        assert_eq!(id.as_persistent(), None);
    }

    #[test]
    fn parse_identity() {
        assert_eq!(Identity::parse("42"), Some(Identity::Persistent(42)));
        assert_eq!(Identity::parse(" 7 "), Some(Identity::Persistent(7)));
        assert_eq!(
            Identity::parse("tmp-1"),
            Some(Identity::Temporary("tmp-1".into()))
        );
        assert_eq!(Identity::parse("  "), None);
    }

    #[test]
    fn wire_form() {
        let json = serde_json::to_string(&Identity::Persistent(5)).unwrap();
        assert_eq!(json, "5");

        let parsed: Identity = serde_json::from_str("\"tmp-9\"").unwrap();
        assert_eq!(parsed, Identity::temporary(9));

        let parsed: Identity = serde_json::from_str("12").unwrap();
        assert_eq!(parsed, Identity::Persistent(12));
    }

    #[test]
    fn display() {
        assert_eq!(Identity::Persistent(10).to_string(), "10");
        assert_eq!(Identity::temporary(1).to_string(), "tmp-1");
    }
}
