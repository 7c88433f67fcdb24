//! Record types for the synchronized table.

use crate::Identity;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Name of the field that carries a record's identity on the wire.
pub const IDENTITY_FIELD: &str = "id";

/// Named scalar fields of a record, excluding the identity.
pub type Fields = BTreeMap<String, Value>;

/// Per-field diff produced by a mutation.
pub type FieldChanges = BTreeMap<String, FieldChange>;

/// Origin of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Made by the local user
    Local,
    /// Applied on behalf of the remote store
    Remote,
}

/// Old and new value of a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
}

/// A flat record: one identity plus named scalar fields.
///
/// Serializes as a single flat JSON object with the identity under `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Persistent or temporary identity
    pub id: Identity,
    /// Field values
    #[serde(flatten)]
    pub fields: Fields,
}

impl Record {
    /// Create a new record. An `id` key inside `fields` is discarded.
    pub fn new(id: impl Into<Identity>, mut fields: Fields) -> Self {
        fields.remove(IDENTITY_FIELD);
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Check if the record still carries a local placeholder identity.
    pub fn is_temporary(&self) -> bool {
        self.id.is_temporary()
    }

    /// Get a field value. Absent fields read as `None`.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Set a single field, returning the change if the value differs.
    ///
    /// The identity cannot be changed this way; see [`Record::replace_with`].
    pub fn set(&mut self, field: &str, value: Value) -> Option<FieldChange> {
        if field == IDENTITY_FIELD {
            return None;
        }
        let old = self.fields.get(field).cloned().unwrap_or(Value::Null);
        if old == value {
            return None;
        }
        self.fields.insert(field.to_string(), value.clone());
        Some(FieldChange { old, new: value })
    }

    /// Apply a set of field values in place and return the effective diff.
    pub fn apply(&mut self, fields: &Fields) -> FieldChanges {
        fields
            .iter()
            .filter_map(|(name, value)| {
                self.set(name, value.clone())
                    .map(|change| (name.clone(), change))
            })
            .collect()
    }

    /// Replace identity and fields with `other`, returning the full diff.
    ///
    /// Fields missing from `other` are cleared and reported with a `null`
    /// new value. An identity change is reported under [`IDENTITY_FIELD`].
    pub fn replace_with(&mut self, other: Record) -> FieldChanges {
        let mut changes = FieldChanges::new();

        if self.id != other.id {
            changes.insert(
                IDENTITY_FIELD.to_string(),
                FieldChange {
                    old: identity_value(&self.id),
                    new: identity_value(&other.id),
                },
            );
        }

        for (name, old) in &self.fields {
            if !other.fields.contains_key(name) && !old.is_null() {
                changes.insert(
                    name.clone(),
                    FieldChange {
                        old: old.clone(),
                        new: Value::Null,
                    },
                );
            }
        }
        for (name, new) in &other.fields {
            let old = self.fields.get(name).cloned().unwrap_or(Value::Null);
            if &old != new {
                changes.insert(
                    name.clone(),
                    FieldChange {
                        old,
                        new: new.clone(),
                    },
                );
            }
        }

        *self = Record::new(other.id, other.fields);
        changes
    }
}

/// A record about to be added to a store, possibly without an identity yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordDraft {
    /// Identity to use; a temporary one is generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Identity>,
    /// Field values
    #[serde(flatten)]
    pub fields: Fields,
}

impl RecordDraft {
    /// Create a draft without an identity.
    pub fn new(fields: Fields) -> Self {
        Self { id: None, fields }
    }

    /// Create a draft with an explicit identity.
    pub fn with_id(id: impl Into<Identity>, fields: Fields) -> Self {
        Self {
            id: Some(id.into()),
            fields,
        }
    }
}

impl From<Record> for RecordDraft {
    fn from(record: Record) -> Self {
        Self::with_id(record.id, record.fields)
    }
}

fn identity_value(id: &Identity) -> Value {
    match id {
        Identity::Persistent(n) => Value::from(*n),
        Identity::Temporary(tag) => Value::from(tag.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn create_record() {
        let record = Record::new(1, fields(json!({"id": 99, "name": "Alice"})));

        assert_eq!(record.id, Identity::Persistent(1));
        assert_eq!(record.get("name"), Some(&json!("Alice")));
        assert_eq!(record.get("id"), None);
        assert!(!record.is_temporary());
    }

    #[test]
    fn set_reports_only_real_changes() {
        let mut record = Record::new(1, fields(json!({"name": "Alice"})));

        assert_eq!(record.set("name", json!("Alice")), None);
        assert_eq!(
            record.set("name", json!("Alicia")),
            Some(FieldChange {
                old: json!("Alice"),
                new: json!("Alicia"),
            })
        );
        // absent reads as null
        assert_eq!(record.set("age", Value::Null), None);
        assert_eq!(record.set("id", json!(5)), None);
        assert_eq!(record.id, Identity::Persistent(1));
    }

    #[test]
    fn apply_fields() {
        let mut record = Record::new(1, fields(json!({"name": "Alice", "age": 30})));
        let changes = record.apply(&fields(json!({"name": "Alice", "age": 31, "city": "Oslo"})));

        assert_eq!(changes.len(), 2);
        assert_eq!(changes["age"].old, json!(30));
        assert_eq!(changes["age"].new, json!(31));
        assert_eq!(changes["city"].old, Value::Null);
        assert_eq!(record.get("city"), Some(&json!("Oslo")));
    }

    #[test]
    fn replace_with_promotes_identity() {
        let mut record = Record::new(
            Identity::temporary(1),
            fields(json!({"name": "Carl", "age": null, "nick": "C"})),
        );
        let server = Record::new(8, fields(json!({"name": "Carl", "age": null, "city": ""})));

        let changes = record.replace_with(server.clone());

        assert_eq!(record, server);
        assert_eq!(changes["id"].old, json!("tmp-1"));
        assert_eq!(changes["id"].new, json!(8));
        assert_eq!(changes["nick"].new, Value::Null);
        assert_eq!(changes["city"].new, json!(""));
        assert!(!changes.contains_key("name"));
    }

    #[test]
    fn flat_wire_form() {
        let record: Record =
            serde_json::from_value(json!({"id": 3, "name": "Bob", "age": 41})).unwrap();
        assert_eq!(record.id, Identity::Persistent(3));
        assert_eq!(record.fields.len(), 2);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!({"id": 3, "name": "Bob", "age": 41}));
    }

    #[test]
    fn draft_from_json() {
        let draft: RecordDraft = serde_json::from_value(json!({"name": "New"})).unwrap();
        assert_eq!(draft.id, None);
        assert_eq!(draft.fields.len(), 1);

        let draft: RecordDraft =
            serde_json::from_value(json!({"id": "tmp-4", "name": "New"})).unwrap();
        assert_eq!(draft.id, Some(Identity::temporary(4)));
    }

    #[test]
    fn origin_serialization() {
        assert_eq!(serde_json::to_string(&Origin::Local).unwrap(), "\"local\"");
        assert_eq!(serde_json::to_string(&Origin::Remote).unwrap(), "\"remote\"");
    }
}
