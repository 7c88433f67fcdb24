//! # gridsync client
//!
//! Keeps a local [`LocalStoreAdapter`](gridsync_engine::LocalStoreAdapter)
//! synchronized, in both directions and in near real time, with a remote
//! multi-writer table.
//!
//! ## Moving parts
//!
//! - [`RemoteGateway`]: CRUD plus change feed of the remote table
//!   ([`HttpGateway`] for a `gridsync-server`, [`MemoryRemote`] in process)
//! - [`Reconciler`]: decides what to send remotely and what to apply locally
//! - [`SyncSession`]: the settled and liveness flags of one collection
//! - [`Bootstrap`]: initial load, then starts the sync loop and returns a
//!   [`SyncHandle`]
//!
//! ## Consistency
//!
//! Remote events are applied idempotently and local edits are pushed only
//! after the initial snapshot is loaded. When anything goes wrong on the
//! remote side the local store is overwritten with a fresh snapshot. Edits
//! that had not reached the remote yet are discarded by that overwrite; there
//! is no offline queue.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use gridsync_client::{Bootstrap, MemoryRemote, Readiness, SyncSession};
//! use gridsync_engine::{LocalStoreAdapter, MemoryStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> gridsync_client::Result<()> {
//! let remote = Arc::new(MemoryRemote::new());
//! let store = Arc::new(Mutex::new(MemoryStore::new()));
//! let session = SyncSession::shared();
//!
//! let handle = Bootstrap::new(store.clone(), remote, session.clone())
//!     .run(Readiness::ready())
//!     .await?;
//!
//! assert!(session.is_settled());
//! assert!(store.lock().unwrap().is_empty());
//! handle.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod gateway;
pub mod grid;
pub mod http;
pub mod memory;
pub mod reconcile;
pub mod session;

pub use bootstrap::{Bootstrap, SyncHandle};
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, RemoteError, Result};
pub use gateway::{FeedItem, RemoteGateway, Subscription};
pub use http::HttpGateway;
pub use memory::{Call, CallKind, MemoryRemote};
pub use reconcile::{Promotion, Reconciler, ResyncPolicy, SkipReason, Skipped, SyncReport};
pub use session::{Readiness, ReadySignal, SyncSession};
