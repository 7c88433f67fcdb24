//! Record persistence.
//!
//! [`RecordRepository`] is the storage seam of the records API: [`PgRepository`]
//! keeps rows in PostgreSQL, [`MemoryRepository`] keeps them in process for
//! tests and local experiments.

mod memory;
mod pool;
mod records;

pub use memory::MemoryRepository;
pub use pool::*;
pub use records::*;

use async_trait::async_trait;
use gridsync_engine::{Fields, Record, RecordSchema};
use serde_json::Value;

use crate::error::Result;

/// The before and after images of an updated row.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordChange {
    pub old: Record,
    pub new: Record,
}

impl RecordChange {
    /// Whether the update actually changed a field.
    pub fn is_noop(&self) -> bool {
        self.old == self.new
    }
}

/// Row storage for one collection. Identities are assigned by the repository.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// All rows, ordered by id.
    async fn list(&self) -> Result<Vec<Record>>;

    /// Store a new row and return it with its assigned id.
    async fn insert(&self, fields: &Fields) -> Result<Record>;

    /// Merge `patch` into row `id`.
    ///
    /// The merged row is checked against `schema` before anything is written.
    /// Returns `None` when the row does not exist.
    async fn update(
        &self,
        id: i64,
        patch: &Fields,
        schema: &RecordSchema,
    ) -> Result<Option<RecordChange>>;

    /// Delete row `id`, returning it if it existed.
    async fn delete(&self, id: i64) -> Result<Option<Record>>;
}

/// Apply a patch to stored fields and validate the result.
pub(crate) fn merge_patch(
    current: &Fields,
    patch: &Fields,
    schema: &RecordSchema,
) -> Result<Fields> {
    let mut merged = current.clone();
    merged.extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
    let merged = schema.normalize_fields(&merged);
    schema.check_fields(&merged)?;
    Ok(merged)
}

/// Fields stored in a JSONB payload. Anything but an object reads as empty.
pub(crate) fn fields_from_payload(payload: Value) -> Fields {
    match payload {
        Value::Object(map) => map.into_iter().collect(),
        _ => Fields::new(),
    }
}
