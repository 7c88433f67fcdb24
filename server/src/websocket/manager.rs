//! WebSocket connection manager.
//!
//! Tracks change feed subscribers and fans remote events out to them.

use std::sync::Arc;

use dashmap::DashMap;
use gridsync_engine::RemoteEvent;
use tokio::sync::mpsc;

/// Sender for change feed events.
pub type EventSender = mpsc::UnboundedSender<RemoteEvent>;

/// A single change feed subscriber.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: String,
    /// Channel to send events to this connection
    pub sender: EventSender,
}

/// A registered connection, unregistered when dropped.
///
/// Holding one keeps the connection in the broadcast set; dropping it
/// (including on a handshake that never completes) removes it.
#[derive(Debug)]
pub struct FeedRegistration {
    feed: Arc<ConnectionManager>,
    id: String,
}

impl FeedRegistration {
    /// The connection ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The manager this connection is registered with.
    pub fn feed(&self) -> &Arc<ConnectionManager> {
        &self.feed
    }
}

impl Drop for FeedRegistration {
    fn drop(&mut self) {
        self.feed.unregister(&self.id);
    }
}

/// Manages active change feed connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    /// All active connections, keyed by connection ID.
    connections: DashMap<String, Connection>,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection.
    ///
    /// Returns the connection ID.
    pub fn register(&self, sender: EventSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        self.connections.insert(
            conn_id.clone(),
            Connection {
                id: conn_id.clone(),
                sender,
            },
        );

        tracing::info!(conn_id = %conn_id, "Change feed connection registered");

        conn_id
    }

    /// Register a new connection with its own channel.
    ///
    /// The connection stays registered for as long as the returned
    /// [`FeedRegistration`] is alive.
    pub fn subscribe(
        self: &Arc<Self>,
    ) -> (FeedRegistration, mpsc::UnboundedReceiver<RemoteEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.register(tx);
        let registration = FeedRegistration {
            feed: self.clone(),
            id,
        };
        (registration, rx)
    }

    /// Unregister a connection.
    pub fn unregister(&self, conn_id: &str) {
        if self.connections.remove(conn_id).is_some() {
            tracing::info!(conn_id = %conn_id, "Change feed connection unregistered");
        }
    }

    /// Send an event to every connection.
    ///
    /// Connections whose receiver is gone are dropped. Returns the number of
    /// connections that received the event.
    pub fn broadcast(&self, event: &RemoteEvent) -> usize {
        let mut sent_count = 0;
        let mut closed = Vec::new();

        for entry in self.connections.iter() {
            let conn = entry.value();
            if conn.sender.send(event.clone()).is_ok() {
                sent_count += 1;
            } else {
                closed.push(conn.id.clone());
            }
        }

        // Removing while iterating would deadlock the shard
        for conn_id in closed {
            self.unregister(&conn_id);
        }

        tracing::debug!(
            event_type = event.event_type(),
            id = %event.target(),
            recipients = sent_count,
            "Broadcast change"
        );

        sent_count
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
