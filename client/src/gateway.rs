//! Remote Sync Gateway - the async boundary to the remote store.
//!
//! A [`RemoteGateway`] wraps row-oriented CRUD over one collection plus the
//! remote change feed. Implementations return normalized results or a
//! [`RemoteError`] and never retry; recovery is the reconciler's job.

use async_trait::async_trait;
use gridsync_engine::{Fields, Record, RemoteEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::RemoteError;

/// One item from the change feed.
pub type FeedItem = Result<RemoteEvent, RemoteError>;

/// Capability surface the reconciler needs from the remote store.
///
/// Write operations take the persistent integer identity, so a temporary
/// identity can never reach the remote.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Fetch every record in the collection.
    async fn fetch_all(&self) -> Result<Vec<Record>, RemoteError>;

    /// Create a row and return it as stored, with its persistent identity.
    async fn insert(&self, fields: &Fields) -> Result<Record, RemoteError>;

    /// Write field values to an existing row.
    async fn update(&self, id: i64, fields: &Fields) -> Result<(), RemoteError>;

    /// Delete a row.
    async fn delete(&self, id: i64) -> Result<(), RemoteError>;

    /// Open the change feed.
    async fn subscribe(&self) -> Result<Subscription, RemoteError>;
}

/// A live change feed.
///
/// Delivery stops when the subscription is dropped or
/// [`unsubscribe`](Subscription::unsubscribe)d.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::UnboundedReceiver<FeedItem>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wrap a receiver fed by `task`. The task is aborted on teardown.
    pub fn new(events: mpsc::UnboundedReceiver<FeedItem>, task: Option<JoinHandle<()>>) -> Self {
        Self { events, task }
    }

    /// Create a subscription fed directly through the returned sender.
    pub fn channel() -> (mpsc::UnboundedSender<FeedItem>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx, None))
    }

    /// Wait for the next feed item. `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<FeedItem> {
        self.events.recv().await
    }

    /// Stop delivery.
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.events.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}
