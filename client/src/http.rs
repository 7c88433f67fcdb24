//! HTTP + WebSocket gateway to a gridsync records server.
//!
//! CRUD goes over plain REST (`/records`, `/records/{id}`); the change feed is
//! a WebSocket at `/records/changes` streaming one RemoteEvent per text frame.

use async_trait::async_trait;
use futures::StreamExt;
use gridsync_engine::{Fields, Record, RemoteEvent};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::error::RemoteError;
use crate::gateway::{RemoteGateway, Subscription};

/// Gateway talking to `gridsync-server` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    /// Create a gateway for the server at `base_url` (e.g. `http://127.0.0.1:3000`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a gateway sharing an existing HTTP client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn records_url(&self) -> String {
        format!("{}/records", self.base_url)
    }

    fn record_url(&self, id: i64) -> String {
        format!("{}/records/{}", self.base_url, id)
    }

    /// WebSocket URL of the change feed.
    pub fn changes_url(&self) -> String {
        let base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{base}/records/changes")
    }
}

/// Turn a non-2xx response into [`RemoteError::Status`].
async fn check(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(RemoteError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Decode one change feed frame.
fn decode_frame(message: Message) -> Option<Result<RemoteEvent, RemoteError>> {
    match message {
        Message::Text(text) => Some(serde_json::from_str(&text).map_err(RemoteError::from)),
        Message::Binary(bytes) => Some(serde_json::from_slice(&bytes).map_err(RemoteError::from)),
        // Control frames are handled by tungstenite
        _ => None,
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn fetch_all(&self) -> Result<Vec<Record>, RemoteError> {
        let response = self.client.get(self.records_url()).send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn insert(&self, fields: &Fields) -> Result<Record, RemoteError> {
        let response = self
            .client
            .post(self.records_url())
            .json(fields)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn update(&self, id: i64, fields: &Fields) -> Result<(), RemoteError> {
        let response = self
            .client
            .patch(self.record_url(id))
            .json(fields)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), RemoteError> {
        let response = self.client.delete(self.record_url(id)).send().await?;
        check(response).await?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription, RemoteError> {
        let url = self.changes_url();
        let (mut socket, _) = tokio_tungstenite::connect_async(&url).await?;
        tracing::info!(url = %url, "Change feed connected");

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let end = loop {
                let item = match socket.next().await {
                    None | Some(Ok(Message::Close(_))) => break RemoteError::SubscriptionClosed,
                    Some(Err(e)) => break e.into(),
                    Some(Ok(message)) => match decode_frame(message) {
                        Some(item) => item,
                        None => continue,
                    },
                };
                if tx.send(item).is_err() {
                    tracing::debug!("Change feed receiver dropped");
                    return;
                }
            };
            tracing::warn!(error = %end, "Change feed disconnected");
            let _ = tx.send(Err(end));
        });

        Ok(Subscription::new(rx, Some(task)))
    }
}
