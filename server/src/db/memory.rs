//! In-process record storage.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use gridsync_engine::{Fields, Record, RecordSchema};

use super::{merge_patch, RecordChange, RecordRepository};
use crate::error::Result;

#[derive(Debug)]
struct Rows {
    rows: BTreeMap<i64, Fields>,
    next_id: i64,
}

/// Repository keeping rows in memory. Ids start at 1 and are never reused.
#[derive(Debug)]
pub struct MemoryRepository {
    inner: Mutex<Rows>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Rows {
                rows: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Rows> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordRepository for MemoryRepository {
    async fn list(&self) -> Result<Vec<Record>> {
        Ok(self
            .lock()
            .rows
            .iter()
            .map(|(id, fields)| Record::new(*id, fields.clone()))
            .collect())
    }

    async fn insert(&self, fields: &Fields) -> Result<Record> {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.rows.insert(id, fields.clone());
        Ok(Record::new(id, fields.clone()))
    }

    async fn update(
        &self,
        id: i64,
        patch: &Fields,
        schema: &RecordSchema,
    ) -> Result<Option<RecordChange>> {
        let mut inner = self.lock();
        let Some(current) = inner.rows.get_mut(&id) else {
            return Ok(None);
        };

        let merged = merge_patch(current, patch, schema)?;
        let old = std::mem::replace(current, merged.clone());

        Ok(Some(RecordChange {
            old: Record::new(id, old),
            new: Record::new(id, merged),
        }))
    }

    async fn delete(&self, id: i64) -> Result<Option<Record>> {
        Ok(self
            .lock()
            .rows
            .remove(&id)
            .map(|fields| Record::new(id, fields)))
    }
}
