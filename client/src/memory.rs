//! In-process remote store.
//!
//! [`MemoryRemote`] behaves like a multi-writer remote table: it assigns
//! sequential integer identities, broadcasts every successful write to all
//! subscribers (the writer included, like a real change feed), records each
//! call it receives and can be told to fail or delay specific call kinds.
//! A delayed call takes effect immediately; only its response is late.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use gridsync_engine::{Fields, Record, RemoteEvent};
use tokio::sync::mpsc;

use crate::error::RemoteError;
use crate::gateway::{FeedItem, RemoteGateway, Subscription};

/// Kind of gateway call, used for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    FetchAll,
    Insert,
    Update,
    Delete,
    Subscribe,
}

/// A call received by the memory remote.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    FetchAll,
    Insert(Fields),
    Update(i64, Fields),
    Delete(i64),
    Subscribe,
}

impl Call {
    /// The kind of this call.
    pub fn kind(&self) -> CallKind {
        match self {
            Call::FetchAll => CallKind::FetchAll,
            Call::Insert(_) => CallKind::Insert,
            Call::Update(..) => CallKind::Update,
            Call::Delete(_) => CallKind::Delete,
            Call::Subscribe => CallKind::Subscribe,
        }
    }

    /// Check if the call writes to the remote table.
    pub fn is_write(&self) -> bool {
        matches!(self, Call::Insert(_) | Call::Update(..) | Call::Delete(_))
    }
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    Times(usize),
    Always,
}

#[derive(Debug, Default)]
struct Inner {
    rows: BTreeMap<i64, Fields>,
    next_id: i64,
    calls: Vec<Call>,
    faults: HashMap<CallKind, Fault>,
    latency: HashMap<CallKind, Duration>,
    subscribers: Vec<mpsc::UnboundedSender<FeedItem>>,
    muted: bool,
}

impl Inner {
    fn broadcast(&mut self, item: impl Fn() -> FeedItem) {
        self.subscribers.retain(|tx| tx.send(item()).is_ok());
    }

    fn publish(&mut self, event: RemoteEvent) {
        if !self.muted {
            self.broadcast(|| Ok(event.clone()));
        }
    }
}

/// Multi-writer remote table held in memory.
#[derive(Debug)]
pub struct MemoryRemote {
    inner: Mutex<Inner>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// Create an empty remote. The first insert gets identity 1.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                ..Inner::default()
            }),
        }
    }

    /// Create a remote holding `records`. Temporary identities are skipped.
    pub fn with_records(records: Vec<Record>) -> Self {
        let remote = Self::new();
        {
            let mut inner = remote.lock();
            for record in records {
                if let Some(id) = record.id.as_persistent() {
                    inner.rows.insert(id, record.fields);
                    inner.next_id = inner.next_id.max(id + 1);
                }
            }
        }
        remote
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log a call and apply any fault registered for its kind.
    fn enter(&self, call: Call) -> Result<MutexGuard<'_, Inner>, RemoteError> {
        let mut inner = self.lock();
        let kind = call.kind();
        inner.calls.push(call);

        match inner.faults.get(&kind).copied() {
            Some(Fault::Always) => Err(injected(kind)),
            Some(Fault::Times(n)) => {
                if n <= 1 {
                    inner.faults.remove(&kind);
                } else {
                    inner.faults.insert(kind, Fault::Times(n - 1));
                }
                Err(injected(kind))
            }
            None => Ok(inner),
        }
    }

    /// Make the next `times` calls of `kind` fail.
    pub fn fail_next(&self, kind: CallKind, times: usize) {
        if times > 0 {
            self.lock().faults.insert(kind, Fault::Times(times));
        }
    }

    /// Make every call of `kind` fail until [`heal`](Self::heal)ed.
    pub fn fail_always(&self, kind: CallKind) {
        self.lock().faults.insert(kind, Fault::Always);
    }

    /// Clear faults for `kind`.
    pub fn heal(&self, kind: CallKind) {
        self.lock().faults.remove(&kind);
    }

    /// Delay the response of every call of `kind`.
    pub fn set_latency(&self, kind: CallKind, delay: Duration) {
        self.lock().latency.insert(kind, delay);
    }

    async fn respond(&self, kind: CallKind) {
        let delay = self.lock().latency.get(&kind).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// End every open subscription, as a dropped connection would.
    pub fn close_feeds(&self) {
        self.lock().subscribers.clear();
    }

    /// Stop or resume broadcasting writes to subscribers.
    pub fn set_muted(&self, muted: bool) {
        self.lock().muted = muted;
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Calls of one kind.
    pub fn calls_of(&self, kind: CallKind) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.kind() == kind)
            .cloned()
            .collect()
    }

    /// Number of write calls received.
    pub fn write_count(&self) -> usize {
        self.lock().calls.iter().filter(|c| c.is_write()).count()
    }

    /// Forget the call log.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Current table contents ordered by identity.
    pub fn rows(&self) -> Vec<Record> {
        self.lock()
            .rows
            .iter()
            .map(|(id, fields)| Record::new(*id, fields.clone()))
            .collect()
    }

    /// Get one row.
    pub fn row(&self, id: i64) -> Option<Record> {
        self.lock()
            .rows
            .get(&id)
            .map(|fields| Record::new(id, fields.clone()))
    }

    /// Number of open subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|tx| !tx.is_closed());
        inner.subscribers.len()
    }

    /// Deliver an arbitrary event to subscribers without touching the table.
    pub fn emit(&self, event: RemoteEvent) {
        self.lock().broadcast(|| Ok(event.clone()));
    }

    /// Deliver a feed error to subscribers.
    pub fn emit_error(&self, message: &str) {
        self.lock()
            .broadcast(|| Err(RemoteError::Unavailable(message.to_string())));
    }

    /// Write a row as another client would: applied and broadcast, not logged.
    pub fn write_as_peer(&self, id: i64, fields: Fields) {
        let mut inner = self.lock();
        let new = Record::new(id, fields.clone());
        let event = match inner.rows.insert(id, fields) {
            Some(old) => RemoteEvent::Update {
                old: Some(Record::new(id, old)),
                new,
            },
            None => RemoteEvent::Insert { new },
        };
        inner.next_id = inner.next_id.max(id + 1);
        inner.publish(event);
    }

    /// Delete a row as another client would.
    pub fn delete_as_peer(&self, id: i64) {
        let mut inner = self.lock();
        if let Some(old) = inner.rows.remove(&id) {
            inner.publish(RemoteEvent::Delete {
                old: Record::new(id, old),
            });
        }
    }
}

fn injected(kind: CallKind) -> RemoteError {
    RemoteError::Unavailable(format!("injected {kind:?} failure"))
}

#[async_trait]
impl RemoteGateway for MemoryRemote {
    async fn fetch_all(&self) -> Result<Vec<Record>, RemoteError> {
        let records = {
            let inner = self.enter(Call::FetchAll)?;
            inner
                .rows
                .iter()
                .map(|(id, fields)| Record::new(*id, fields.clone()))
                .collect()
        };
        self.respond(CallKind::FetchAll).await;
        Ok(records)
    }

    async fn insert(&self, fields: &Fields) -> Result<Record, RemoteError> {
        let record = {
            let mut inner = self.enter(Call::Insert(fields.clone()))?;

            let id = inner.next_id;
            inner.next_id += 1;
            let record = Record::new(id, fields.clone());
            inner.rows.insert(id, record.fields.clone());
            inner.publish(RemoteEvent::Insert {
                new: record.clone(),
            });
            record
        };
        self.respond(CallKind::Insert).await;
        Ok(record)
    }

    async fn update(&self, id: i64, fields: &Fields) -> Result<(), RemoteError> {
        {
            let mut inner = self.enter(Call::Update(id, fields.clone()))?;

            let Some(row) = inner.rows.get_mut(&id) else {
                return Err(RemoteError::Status {
                    status: 404,
                    message: format!("record {id} not found"),
                });
            };
            let old = Record::new(id, row.clone());
            let mut new = old.clone();
            new.apply(fields);
            *row = new.fields.clone();

            inner.publish(RemoteEvent::Update {
                old: Some(old),
                new,
            });
        }
        self.respond(CallKind::Update).await;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), RemoteError> {
        {
            let mut inner = self.enter(Call::Delete(id))?;

            if let Some(old) = inner.rows.remove(&id) {
                inner.publish(RemoteEvent::Delete {
                    old: Record::new(id, old),
                });
            }
        }
        self.respond(CallKind::Delete).await;
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription, RemoteError> {
        let mut inner = self.enter(Call::Subscribe)?;
        let (tx, subscription) = Subscription::channel();
        inner.subscribers.push(tx);
        Ok(subscription)
    }
}
