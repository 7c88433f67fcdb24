//! # gridsync engine
//!
//! The record model and local store behind a grid that is kept in sync with a
//! remote, multi-writer table.
//!
//! This crate is the synchronous half of gridsync. It knows how records look,
//! how to clean and validate them before they are written remotely, and how
//! the local copy of the table is stored and observed. The async reconciliation
//! loop that talks to the remote store lives in `gridsync-client`.
//!
//! ## Design Principles
//!
//! - **No IO**: nothing here touches the network, files or clocks
//! - **Synchronous notification**: every store mutation reports its diff to
//!   listeners before it returns
//! - **One identity per record**: either remote-assigned or a local placeholder
//!
//! ## Core Concepts
//!
//! ### Records and identities
//!
//! A [`Record`] is a flat map of scalar fields plus an [`Identity`]. Rows
//! created locally get an [`Identity::Temporary`] placeholder (`tmp-1`, ...)
//! that is replaced by the [`Identity::Persistent`] id the remote store assigns
//! on first insert.
//!
//! ### Schema
//!
//! A [`RecordSchema`] normalizes records (trim strings, coerce numbers, fill
//! missing fields) and validates them (required fields, numeric ranges).
//!
//! ### Local store
//!
//! [`LocalStoreAdapter`] is the identity-indexed collection the grid edits.
//! [`MemoryStore`] implements it in memory. Each mutation is tagged with an
//! [`Origin`] so the sync loop can tell user edits from changes it applied
//! itself.
//!
//! ## Quick Start
//!
//! ```rust
//! use gridsync_engine::{
//!     Identity, LocalStoreAdapter, MemoryStore, Origin, RecordDraft, RecordSchema,
//! };
//! use serde_json::json;
//!
//! let schema = RecordSchema::people();
//! let mut store = MemoryStore::new();
//!
//! // A new row gets a temporary identity
//! let added = store.add(vec![RecordDraft::new(schema.draft())], Origin::Local);
//! let id = added[0].id.clone();
//! assert_eq!(id, Identity::temporary(1));
//!
//! // Edit it
//! let edit = serde_json::from_value(json!({"name": "Carl", "age": 30})).unwrap();
//! store.update(&id, &edit, Origin::Local);
//!
//! let record = store.get_by_id(&id).unwrap();
//! assert!(schema.validate(&record));
//! ```

pub mod error;
pub mod event;
pub mod identity;
pub mod record;
pub mod schema;
pub mod store;

// Re-export main types at crate root
pub use error::{Error, Result};
pub use event::{Change, ChangeEvent, RecordUpdate, RemoteEvent};
pub use identity::{Identity, TEMP_PREFIX};
pub use record::{FieldChange, FieldChanges, Fields, Origin, Record, RecordDraft, IDENTITY_FIELD};
pub use schema::{FieldDef, FieldType, RecordSchema};
pub use store::{ListenerId, Listener, LocalStoreAdapter, MemoryStore};
