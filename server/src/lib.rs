//! gridsync server - the remote, multi-writer records store.
//!
//! Serves one collection of flat records over REST and streams every write
//! as an `INSERT` / `UPDATE` / `DELETE` event on a WebSocket change feed.
//! Writes are normalized and validated with the same [`RecordSchema`] the
//! clients use, and are serialized so the feed reports them in commit order.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use gridsync_engine::RecordSchema;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::db::RecordRepository;
use crate::websocket::ConnectionManager;

pub use config::{Config, ConfigError};
pub use error::{AppError, Result};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn RecordRepository>,
    pub feed: Arc<ConnectionManager>,
    pub schema: Arc<RecordSchema>,
    /// Held from the repository write through its broadcast
    pub writes: Arc<Mutex<()>>,
}

impl AppState {
    /// State over `repo` with the people schema.
    pub fn new(repo: Arc<dyn RecordRepository>) -> Self {
        Self {
            repo,
            feed: ConnectionManager::new_shared(),
            schema: Arc::new(RecordSchema::people()),
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// Use a different record schema.
    pub fn with_schema(mut self, schema: RecordSchema) -> Self {
        self.schema = Arc::new(schema);
        self
    }
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
