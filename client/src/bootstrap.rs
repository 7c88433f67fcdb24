//! Bootstrap sequencing and the running sync loop.
//!
//! [`Bootstrap::run`] waits for the local store to be ready, loads the remote
//! snapshot, marks the session settled and then starts two pump tasks: one
//! feeding local change events to the reconciler, one feeding the remote
//! change feed. The returned [`SyncHandle`] owns both.
//!
//! When the change feed ends the inbound pump reopens it with the resync
//! backoff, then resyncs to pick up whatever was missed while disconnected.

use std::sync::{Arc, Mutex, PoisonError};

use gridsync_engine::{ChangeEvent, ListenerId, LocalStoreAdapter, Origin, RecordSchema};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{ClientError, Result};
use crate::gateway::{RemoteGateway, Subscription};
use crate::reconcile::{Reconciler, ResyncPolicy, SyncReport};
use crate::session::{Readiness, SyncSession};

/// Builder for one synchronized collection.
pub struct Bootstrap<S> {
    store: Arc<Mutex<S>>,
    gateway: Arc<dyn RemoteGateway>,
    session: Arc<SyncSession>,
    schema: RecordSchema,
    policy: ResyncPolicy,
}

impl<S: LocalStoreAdapter + 'static> Bootstrap<S> {
    /// Create a bootstrap over the people schema with the default policy.
    pub fn new(
        store: Arc<Mutex<S>>,
        gateway: Arc<dyn RemoteGateway>,
        session: Arc<SyncSession>,
    ) -> Self {
        Self {
            store,
            gateway,
            session,
            schema: RecordSchema::people(),
            policy: ResyncPolicy::default(),
        }
    }

    /// Use a different record schema.
    pub fn schema(mut self, schema: RecordSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Use a different resync policy.
    pub fn resync_policy(mut self, policy: ResyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.session.is_alive() {
            Ok(())
        } else {
            Err(ClientError::Cancelled)
        }
    }

    /// Load the snapshot and start synchronizing.
    ///
    /// The change feed is opened before the snapshot is fetched so that no
    /// remote change falls between the two; events already reflected in the
    /// snapshot apply as no-ops. Local edits are only pushed once the session
    /// is settled.
    ///
    /// Fails with [`ClientError::Cancelled`] if the session is cancelled or
    /// the readiness signal is dropped first. Nothing is written to the store
    /// after cancellation.
    pub async fn run(self, readiness: Readiness) -> Result<SyncHandle<S>> {
        tokio::select! {
            biased;
            _ = self.session.cancelled() => return Err(ClientError::Cancelled),
            ready = readiness.wait() => ready?,
        }
        self.ensure_alive()?;

        let subscription = self.gateway.subscribe().await?;
        self.ensure_alive()?;
        self.session.set_feed_connected(true);

        let records = self.gateway.fetch_all().await?;
        self.ensure_alive()?;

        let loaded = {
            let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            store.replace_all(records, Origin::Remote)
        };
        self.session.mark_settled();
        tracing::info!(records = loaded, "Initial snapshot loaded, sync enabled");

        let (tx, rx) = mpsc::unbounded_channel();
        let listener = {
            let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            store.subscribe(Box::new(move |event: &ChangeEvent| {
                if event.origin == Origin::Local {
                    let _ = tx.send(event.clone());
                }
            }))
        };

        let reconciler = Arc::new(
            Reconciler::new(self.store.clone(), self.gateway, self.session.clone())
                .with_schema(self.schema)
                .with_policy(self.policy),
        );

        let outbound = tokio::spawn(outbound_pump(reconciler.clone(), rx));
        let inbound = tokio::spawn(inbound_pump(reconciler.clone(), subscription));

        Ok(SyncHandle {
            reconciler,
            store: self.store,
            session: self.session,
            listener: Some(listener),
            tasks: vec![outbound, inbound],
        })
    }
}

async fn outbound_pump<S: LocalStoreAdapter + 'static>(
    reconciler: Arc<Reconciler<S>>,
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
) {
    let session = reconciler.session().clone();
    loop {
        let event = tokio::select! {
            biased;
            _ = session.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let report = reconciler.handle_local_change(event).await;
        log_report("outbound", &report);
    }
    tracing::debug!("Outbound pump stopped");
}

async fn inbound_pump<S: LocalStoreAdapter + 'static>(
    reconciler: Arc<Reconciler<S>>,
    mut subscription: Subscription,
) {
    let session = reconciler.session().clone();
    loop {
        let item = tokio::select! {
            biased;
            _ = session.cancelled() => break,
            item = subscription.next() => item,
        };

        let report = match item {
            Some(Ok(event)) => reconciler.handle_remote_event(event).await,
            Some(Err(e)) => reconciler.handle_feed_error(e).await,
            None => {
                tracing::warn!("Change feed ended, reconnecting");
                session.set_feed_connected(false);
                let Some(reopened) = reconnect(&reconciler).await else {
                    break;
                };
                subscription = reopened;
                session.set_feed_connected(true);
                reconciler.resync().await
            }
        };
        log_report("inbound", &report);
    }
    session.set_feed_connected(false);
    subscription.unsubscribe();
    tracing::debug!("Inbound pump stopped");
}

/// Reopen the change feed, backing off between attempts until it succeeds or
/// the session is cancelled.
async fn reconnect<S: LocalStoreAdapter + 'static>(
    reconciler: &Reconciler<S>,
) -> Option<Subscription> {
    let session = reconciler.session();
    let policy = reconciler.policy();
    let mut attempt: u32 = 0;

    loop {
        attempt = attempt.saturating_add(1);
        match reconciler.resubscribe().await {
            Ok(subscription) => {
                tracing::info!(attempt, "Change feed reconnected");
                return Some(subscription);
            }
            Err(ClientError::Cancelled) => return None,
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Change feed reconnect failed");
            }
        }

        let delay = policy.delay_after(attempt.min(policy.attempts()));
        tokio::select! {
            biased;
            _ = session.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn log_report(direction: &'static str, report: &SyncReport) {
    if report.is_empty() {
        return;
    }
    tracing::debug!(
        direction,
        promoted = report.promoted.len(),
        updated = report.updated.len(),
        deleted = report.deleted.len(),
        applied = report.applied.len(),
        skipped = report.skipped.len(),
        resynced = report.resynced,
        "Sync step"
    );
}

/// A running synchronization.
///
/// Dropping the handle, or calling [`shutdown`](SyncHandle::shutdown), marks
/// the session dead, detaches the store listener and stops both pumps. The
/// change feed subscription is released with the inbound pump.
pub struct SyncHandle<S: LocalStoreAdapter> {
    reconciler: Arc<Reconciler<S>>,
    store: Arc<Mutex<S>>,
    session: Arc<SyncSession>,
    listener: Option<ListenerId>,
    tasks: Vec<JoinHandle<()>>,
}

impl<S: LocalStoreAdapter> SyncHandle<S> {
    /// The reconciler driving this sync.
    pub fn reconciler(&self) -> &Arc<Reconciler<S>> {
        &self.reconciler
    }

    /// The session of this sync.
    pub fn session(&self) -> &Arc<SyncSession> {
        &self.session
    }

    /// The synchronized store.
    pub fn store(&self) -> &Arc<Mutex<S>> {
        &self.store
    }

    /// Whether the change feed is currently connected.
    pub fn is_feed_connected(&self) -> bool {
        self.session.is_feed_connected()
    }

    /// Overwrite the local store with the remote snapshot now.
    pub async fn resync(&self) -> SyncReport {
        self.reconciler.resync().await
    }

    /// Stop synchronizing.
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        self.session.cancel();

        if let Some(listener) = self.listener.take() {
            let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            store.unsubscribe(listener);
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl<S: LocalStoreAdapter> Drop for SyncHandle<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{CallKind, MemoryRemote};
    use gridsync_engine::{MemoryStore, Record, RecordDraft};
    use serde_json::json;
    use std::time::Duration;

    fn people(rows: &[(i64, &str)]) -> Vec<Record> {
        rows.iter()
            .map(|(id, name)| {
                Record::new(*id, serde_json::from_value(json!({"name": name})).unwrap())
            })
            .collect()
    }

    #[tokio::test]
    async fn bootstrap_loads_snapshot_without_writes() {
        let remote = Arc::new(MemoryRemote::with_records(people(&[(1, "A")])));
        let store = Arc::new(Mutex::new(MemoryStore::new()));
        let session = SyncSession::shared();

        let handle = Bootstrap::new(store.clone(), remote.clone(), session.clone())
            .run(Readiness::ready())
            .await
            .unwrap();

        assert!(session.is_settled());
        assert_eq!(store.lock().unwrap().records(), people(&[(1, "A")]));
        assert_eq!(remote.write_count(), 0);
        assert_eq!(remote.subscriber_count(), 1);

        handle.shutdown();
    }

    #[tokio::test]
    async fn waits_for_readiness() {
        let remote = Arc::new(MemoryRemote::new());
        let store = Arc::new(Mutex::new(MemoryStore::new()));
        let session = SyncSession::shared();
        let (signal, readiness) = Readiness::pending();

        let task = tokio::spawn(
            Bootstrap::new(store, remote.clone(), session.clone()).run(readiness),
        );
        tokio::task::yield_now().await;
        assert!(remote.calls().is_empty());
        assert!(!session.is_settled());

        signal.ready();
        let handle = task.await.unwrap().unwrap();
        assert!(session.is_settled());
        drop(handle);
    }

    #[tokio::test]
    async fn cancelled_before_ready_has_no_effect() {
        let remote = Arc::new(MemoryRemote::with_records(people(&[(1, "A")])));
        let store = Arc::new(Mutex::new(MemoryStore::new()));
        let session = SyncSession::shared();
        let (_signal, readiness) = Readiness::pending();

        let task = tokio::spawn(
            Bootstrap::new(store.clone(), remote.clone(), session.clone()).run(readiness),
        );
        tokio::task::yield_now().await;
        session.cancel();

        assert!(matches!(task.await.unwrap(), Err(ClientError::Cancelled)));
        assert!(store.lock().unwrap().is_empty());
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_snapshot_fails_bootstrap() {
        let remote = Arc::new(MemoryRemote::new());
        remote.fail_next(CallKind::FetchAll, 1);
        let store = Arc::new(Mutex::new(MemoryStore::new()));
        let session = SyncSession::shared();

        let result = Bootstrap::new(store, remote, session.clone())
            .run(Readiness::ready())
            .await;

        assert!(matches!(result, Err(ClientError::Remote(_))));
        assert!(!session.is_settled());
    }

    #[tokio::test]
    async fn feed_reconnects_after_it_ends() {
        let remote = Arc::new(MemoryRemote::with_records(people(&[(1, "A")])));
        let store = Arc::new(Mutex::new(MemoryStore::new()));
        let session = SyncSession::shared();

        let handle = Bootstrap::new(store.clone(), remote.clone(), session.clone())
            .resync_policy(ResyncPolicy::new(3, Duration::from_millis(5)))
            .run(Readiness::ready())
            .await
            .unwrap();
        assert!(handle.is_feed_connected());

        remote.fail_next(CallKind::Subscribe, 1);
        remote.close_feeds();
        // Written while nobody is listening
        remote.write_as_peer(3, serde_json::from_value(json!({"name": "C"})).unwrap());

        let has = |id: i64| {
            store
                .lock()
                .unwrap()
                .contains(&gridsync_engine::Identity::Persistent(id))
        };
        for _ in 0..200 {
            if has(3) && remote.subscriber_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(has(3));
        assert!(handle.is_feed_connected());
        assert_eq!(remote.subscriber_count(), 1);
        assert_eq!(remote.calls_of(CallKind::Subscribe).len(), 3);

        remote.write_as_peer(4, serde_json::from_value(json!({"name": "D"})).unwrap());
        for _ in 0..200 {
            if has(4) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(has(4));

        handle.shutdown();
        assert!(!session.is_feed_connected());
    }

    #[tokio::test]
    async fn shutdown_detaches_everything() {
        let remote = Arc::new(MemoryRemote::new());
        let store = Arc::new(Mutex::new(MemoryStore::new()));
        let session = SyncSession::shared();

        let handle = Bootstrap::new(store.clone(), remote.clone(), session.clone())
            .run(Readiness::ready())
            .await
            .unwrap();
        assert_eq!(store.lock().unwrap().listener_count(), 1);

        handle.shutdown();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(!session.is_alive());
        assert_eq!(store.lock().unwrap().listener_count(), 0);
        assert_eq!(remote.subscriber_count(), 0);

        // Edits after shutdown go nowhere
        store
            .lock()
            .unwrap()
            .add(vec![RecordDraft::default()], Origin::Local);
        assert_eq!(remote.write_count(), 0);
    }
}
