//! Local store - the in-memory, identity-indexed record collection.
//!
//! The store owns the authoritative local copy of every record. Each mutation
//! is atomic and notifies subscribers synchronously, before the call returns,
//! with a [`ChangeEvent`] describing what changed.

use crate::{
    error::Result, Change, ChangeEvent, Error, FieldChanges, Fields, Identity, Origin, Record,
    RecordDraft, RecordUpdate,
};
use std::collections::HashMap;
use std::fmt;

/// Callback invoked after every store mutation.
pub type Listener = Box<dyn FnMut(&ChangeEvent) + Send>;

/// Handle returned by [`LocalStoreAdapter::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Capability surface the sync engine needs from a local record store.
///
/// Operations on identities that are not present are no-ops, reported through
/// the return value rather than as errors.
pub trait LocalStoreAdapter: Send {
    /// Get a copy of a record by identity.
    fn get_by_id(&self, id: &Identity) -> Option<Record>;

    /// Check if a record with this identity exists.
    fn contains(&self, id: &Identity) -> bool {
        self.get_by_id(id).is_some()
    }

    /// Add records, generating temporary identities where none is given.
    ///
    /// Drafts whose identity is already present are skipped. Returns the
    /// records actually added.
    fn add(&mut self, drafts: Vec<RecordDraft>, origin: Origin) -> Vec<Record>;

    /// Apply field values to a record. Returns `None` if the record is absent,
    /// otherwise the effective diff (possibly empty).
    fn update(&mut self, id: &Identity, fields: &Fields, origin: Origin) -> Option<FieldChanges>;

    /// Replace a record in place, identity included.
    ///
    /// Fails with [`Error::DuplicateIdentity`] if the new identity belongs to
    /// another record; the store is left unchanged in that case.
    fn replace(
        &mut self,
        id: &Identity,
        record: Record,
        origin: Origin,
    ) -> Result<Option<FieldChanges>>;

    /// Remove records by identity. Returns the records actually removed.
    fn remove(&mut self, ids: &[Identity], origin: Origin) -> Vec<Record>;

    /// Replace the whole contents. Returns the number of records stored.
    fn replace_all(&mut self, records: Vec<Record>, origin: Origin) -> usize;

    /// All records in row order.
    fn records(&self) -> Vec<Record>;

    /// Number of records.
    fn len(&self) -> usize;

    /// Check if the store holds no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a change listener.
    fn subscribe(&mut self, listener: Listener) -> ListenerId;

    /// Remove a change listener. Returns whether it was registered.
    fn unsubscribe(&mut self, id: ListenerId) -> bool;
}

/// In-memory [`LocalStoreAdapter`] keeping insertion (row) order.
#[derive(Default)]
pub struct MemoryStore {
    order: Vec<Identity>,
    records: HashMap<Identity, Record>,
    next_temp: u64,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with records, without notifying anyone.
    pub fn with_records(records: Vec<Record>) -> Self {
        let mut store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn insert(&mut self, record: Record) -> bool {
        if self.records.contains_key(&record.id) {
            return false;
        }
        self.order.push(record.id.clone());
        self.records.insert(record.id.clone(), record);
        true
    }

    fn next_temporary(&mut self) -> Identity {
        loop {
            self.next_temp += 1;
            let id = Identity::temporary(self.next_temp);
            if !self.records.contains_key(&id) {
                return id;
            }
        }
    }

    fn emit(&mut self, event: ChangeEvent) {
        for (_, listener) in &mut self.listeners {
            listener(&event);
        }
    }
}

impl LocalStoreAdapter for MemoryStore {
    fn get_by_id(&self, id: &Identity) -> Option<Record> {
        self.records.get(id).cloned()
    }

    fn contains(&self, id: &Identity) -> bool {
        self.records.contains_key(id)
    }

    fn add(&mut self, drafts: Vec<RecordDraft>, origin: Origin) -> Vec<Record> {
        let mut added = Vec::with_capacity(drafts.len());

        for draft in drafts {
            let id = match draft.id {
                Some(id) => id,
                None => self.next_temporary(),
            };
            let record = Record::new(id, draft.fields);
            if self.insert(record.clone()) {
                added.push(record);
            }
        }

        if !added.is_empty() {
            self.emit(ChangeEvent {
                origin,
                change: Change::Add {
                    records: added.clone(),
                },
            });
        }

        added
    }

    fn update(&mut self, id: &Identity, fields: &Fields, origin: Origin) -> Option<FieldChanges> {
        let record = self.records.get_mut(id)?;
        let changes = record.apply(fields);

        if !changes.is_empty() {
            let update = RecordUpdate {
                record: record.clone(),
                changes: changes.clone(),
            };
            self.emit(ChangeEvent {
                origin,
                change: Change::Update {
                    updates: vec![update],
                },
            });
        }

        Some(changes)
    }

    fn replace(
        &mut self,
        id: &Identity,
        record: Record,
        origin: Origin,
    ) -> Result<Option<FieldChanges>> {
        if !self.records.contains_key(id) {
            return Ok(None);
        }
        if &record.id != id && self.records.contains_key(&record.id) {
            return Err(Error::DuplicateIdentity(record.id));
        }

        let Some(mut current) = self.records.remove(id) else {
            return Ok(None);
        };
        let changes = current.replace_with(record);

        if &current.id != id {
            if let Some(slot) = self.order.iter_mut().find(|slot| *slot == id) {
                *slot = current.id.clone();
            }
        }
        self.records.insert(current.id.clone(), current.clone());

        if !changes.is_empty() {
            self.emit(ChangeEvent {
                origin,
                change: Change::Update {
                    updates: vec![RecordUpdate {
                        record: current,
                        changes: changes.clone(),
                    }],
                },
            });
        }

        Ok(Some(changes))
    }

    fn remove(&mut self, ids: &[Identity], origin: Origin) -> Vec<Record> {
        let removed: Vec<Record> = ids
            .iter()
            .filter_map(|id| self.records.remove(id))
            .collect();

        if !removed.is_empty() {
            let records = &self.records;
            self.order.retain(|id| records.contains_key(id));
            self.emit(ChangeEvent {
                origin,
                change: Change::Remove {
                    records: removed.clone(),
                },
            });
        }

        removed
    }

    fn replace_all(&mut self, records: Vec<Record>, origin: Origin) -> usize {
        self.order.clear();
        self.records.clear();

        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            if self.insert(record.clone()) {
                stored.push(record);
            }
        }

        let count = stored.len();
        self.emit(ChangeEvent {
            origin,
            change: Change::Dataset { records: stored },
        });
        count
    }

    fn records(&self) -> Vec<Record> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect()
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn subscribe(&mut self, listener: Listener) -> ListenerId {
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        self.listeners.push((id, listener));
        id
    }

    fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("records", &self.records())
            .field("next_temp", &self.next_temp)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
