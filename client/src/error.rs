//! Error types for the sync client.

use crate::config::ConfigError;

/// Failure talking to the remote store.
///
/// Every remote failure is recoverable by a full resync; the gateway never
/// retries on its own.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("remote returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("failed to decode remote payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("remote unavailable: {0}")]
    Unavailable(String),

    #[error("change subscription closed")]
    SubscriptionClosed,
}

impl From<tokio_tungstenite::tungstenite::Error> for RemoteError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        RemoteError::WebSocket(Box::new(e))
    }
}

impl RemoteError {
    /// Check if the remote reported the target row as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::Status { status: 404, .. })
    }
}

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Engine error: {0}")]
    Engine(#[from] gridsync_engine::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("sync session cancelled")]
    Cancelled,
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
