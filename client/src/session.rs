//! Per-collection sync session state.
//!
//! A [`SyncSession`] carries the two flags the reconciler consults before
//! touching anything: whether the initial snapshot has been loaded
//! (`settled`) and whether the session is still running (`alive`). A third
//! flag reports whether the change feed is currently connected. Several
//! sessions can coexist in one process, one per synchronized collection.

use std::sync::Arc;

use tokio::sync::{oneshot, watch};

use crate::error::{ClientError, Result};

/// Settled and liveness flags for one synchronized collection.
#[derive(Debug)]
pub struct SyncSession {
    settled: watch::Sender<bool>,
    alive: watch::Sender<bool>,
    feed: watch::Sender<bool>,
}

impl Default for SyncSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncSession {
    /// Create a live, unsettled session.
    pub fn new() -> Self {
        Self {
            settled: watch::Sender::new(false),
            alive: watch::Sender::new(true),
            feed: watch::Sender::new(false),
        }
    }

    /// Create a session wrapped in Arc for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Whether the initial snapshot load has completed.
    pub fn is_settled(&self) -> bool {
        *self.settled.borrow()
    }

    /// Whether the session is still running.
    pub fn is_alive(&self) -> bool {
        *self.alive.borrow()
    }

    /// Mark the initial load as complete. Ignored once cancelled.
    pub fn mark_settled(&self) {
        if self.is_alive() {
            self.settled.send_replace(true);
        }
    }

    /// Observe the settled flag.
    pub fn settled(&self) -> watch::Receiver<bool> {
        self.settled.subscribe()
    }

    /// Whether the change feed is connected.
    pub fn is_feed_connected(&self) -> bool {
        *self.feed.borrow()
    }

    /// Observe the change feed connection.
    pub fn feed_state(&self) -> watch::Receiver<bool> {
        self.feed.subscribe()
    }

    pub(crate) fn set_feed_connected(&self, connected: bool) {
        self.feed.send_replace(connected && self.is_alive());
    }

    /// Stop the session. Pending waiters are released with
    /// [`ClientError::Cancelled`].
    pub fn cancel(&self) {
        self.alive.send_replace(false);
        self.feed.send_replace(false);
    }

    /// Resolve once the session is cancelled.
    pub async fn cancelled(&self) {
        let mut alive = self.alive.subscribe();
        // The sender lives as long as `self`
        let _ = alive.wait_for(|alive| !*alive).await;
    }

    /// Wait until the session is settled.
    pub async fn wait_settled(&self) -> Result<()> {
        let mut settled = self.settled.subscribe();
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(ClientError::Cancelled),
            result = async { settled.wait_for(|s| *s).await.map(|_| ()) } => {
                result.map_err(|_| ClientError::Cancelled)
            }
        }
    }
}

/// Completion half of a [`Readiness`] pair.
#[derive(Debug)]
pub struct ReadySignal(oneshot::Sender<()>);

impl ReadySignal {
    /// Report that the local store is ready to be populated.
    pub fn ready(self) {
        let _ = self.0.send(());
    }
}

/// Future-like readiness of the local store.
///
/// Bootstrap awaits this instead of polling the store.
#[derive(Debug)]
pub struct Readiness(Option<oneshot::Receiver<()>>);

impl Readiness {
    /// Create a pending readiness and the signal that completes it.
    pub fn pending() -> (ReadySignal, Readiness) {
        let (tx, rx) = oneshot::channel();
        (ReadySignal(tx), Readiness(Some(rx)))
    }

    /// Readiness that is already complete.
    pub fn ready() -> Self {
        Readiness(None)
    }

    /// Wait for the signal. Fails with [`ClientError::Cancelled`] if the
    /// signal is dropped without firing.
    pub async fn wait(self) -> Result<()> {
        match self.0 {
            None => Ok(()),
            Some(rx) => rx.await.map_err(|_| ClientError::Cancelled),
        }
    }
}
