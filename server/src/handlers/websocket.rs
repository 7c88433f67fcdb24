//! WebSocket handler for the change feed.
//!
//! The feed is one-way: the server writes RemoteEvent frames and only reads
//! from the socket to notice when the client goes away.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use gridsync_engine::RemoteEvent;
use tokio::sync::mpsc;

use crate::websocket::FeedRegistration;

/// Handle an established change feed connection.
///
/// The connection is already registered; `events` is the receiving half of
/// its channel. On return the registration is dropped, which unregisters it.
pub async fn handle_changes_connection(
    socket: WebSocket,
    registration: FeedRegistration,
    mut events: mpsc::UnboundedReceiver<RemoteEvent>,
) {
    let conn_id = registration.id().to_string();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    tracing::info!(conn_id = %conn_id, "Change feed client connected");

    // Forward events from the channel to the socket
    let send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send change event: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize change event: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                tracing::debug!(
                    conn_id = %conn_id,
                    bytes = text.as_str().len(),
                    "Ignoring client text frame"
                );
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    let feed = registration.feed().clone();
    drop(registration);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        active_connections = feed.connection_count(),
        "Change feed client disconnected"
    );
}
