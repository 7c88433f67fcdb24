//! Change notifications flowing through the sync engine.
//!
//! [`ChangeEvent`]s are emitted by a local store after each mutation.
//! [`RemoteEvent`]s arrive from the remote store's change feed.

use crate::{FieldChanges, Identity, Origin, Record};
use serde::{Deserialize, Serialize};

/// A record together with the fields an update changed on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    /// The record after the update
    pub record: Record,
    /// Per-field old/new values
    pub changes: FieldChanges,
}

/// What a local store mutation did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Change {
    /// Records were added
    Add { records: Vec<Record> },
    /// Records were modified in place
    Update { updates: Vec<RecordUpdate> },
    /// Records were removed
    Remove { records: Vec<Record> },
    /// The whole contents were replaced
    Dataset { records: Vec<Record> },
}

/// Notification emitted synchronously after a local store mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Who caused the mutation
    pub origin: Origin,
    /// The mutation itself
    #[serde(flatten)]
    pub change: Change,
}

impl ChangeEvent {
    /// Create a locally originated event.
    pub fn local(change: Change) -> Self {
        Self {
            origin: Origin::Local,
            change,
        }
    }

    /// Create an event for a mutation applied on behalf of the remote store.
    pub fn remote(change: Change) -> Self {
        Self {
            origin: Origin::Remote,
            change,
        }
    }

    /// The action name: `add`, `update`, `remove` or `dataset`.
    pub fn action(&self) -> &'static str {
        match &self.change {
            Change::Add { .. } => "add",
            Change::Update { .. } => "update",
            Change::Remove { .. } => "remove",
            Change::Dataset { .. } => "dataset",
        }
    }

    /// The records affected by this event.
    pub fn records(&self) -> Vec<&Record> {
        match &self.change {
            Change::Add { records } | Change::Remove { records } | Change::Dataset { records } => {
                records.iter().collect()
            }
            Change::Update { updates } => updates.iter().map(|u| &u.record).collect(),
        }
    }
}

/// A change notification from the remote store.
///
/// Wire form: `{"eventType": "INSERT" | "UPDATE" | "DELETE", "new": .., "old": ..}`.
/// Delivery is at-least-once and unordered relative to local edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "UPPERCASE")]
pub enum RemoteEvent {
    /// A row was created
    Insert { new: Record },
    /// A row was modified; `old` may be missing or carry only the identity
    Update {
        #[serde(default)]
        old: Option<Record>,
        new: Record,
    },
    /// A row was deleted; `old` carries at least the identity
    Delete { old: Record },
}

impl RemoteEvent {
    /// The `eventType` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            RemoteEvent::Insert { .. } => "INSERT",
            RemoteEvent::Update { .. } => "UPDATE",
            RemoteEvent::Delete { .. } => "DELETE",
        }
    }

    /// The identity the event targets in the local store.
    pub fn target(&self) -> &Identity {
        match self {
            RemoteEvent::Insert { new } => &new.id,
            RemoteEvent::Update { old, new } => old.as_ref().map_or(&new.id, |o| &o.id),
            RemoteEvent::Delete { old } => &old.id,
        }
    }
}
