//! Reconciliation - the bidirectional merge between the local store and the
//! remote table.
//!
//! ## Outbound
//!
//! Local change events are turned into remote writes once the session is
//! settled. Records are re-read by identity before every write because the
//! store may have moved on while earlier awaits were pending. A temporary
//! identity is promoted exactly once, from the response of its first
//! successful insert.
//!
//! ## Inbound
//!
//! Remote events are applied idempotently: an INSERT for a known identity,
//! an UPDATE or DELETE for an unknown one, are no-ops. This is also what makes
//! the echo of our own writes harmless.
//!
//! ## Recovery
//!
//! Any remote failure, and any inbound event that cannot be applied, triggers
//! a full resync: the remote snapshot overwrites the local store. Local edits
//! that had not reached the remote yet are lost at that point.
//!
//! The engine keeps no memory between calls beyond the session flags and a
//! count of snapshot loads; everything else is decided by identity lookup in
//! the store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gridsync_engine::{
    Change, ChangeEvent, Fields, Identity, LocalStoreAdapter, Origin, Record, RecordDraft,
    RecordSchema, RecordUpdate, RemoteEvent, IDENTITY_FIELD,
};
use serde::Serialize;

use crate::error::{ClientError, RemoteError, Result};
use crate::gateway::{RemoteGateway, Subscription};
use crate::session::SyncSession;

/// How often and how patiently a resync fetches the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResyncPolicy {
    attempts: u32,
    backoff: Duration,
}

impl ResyncPolicy {
    /// `attempts` is clamped to at least one. Attempt `n` waits
    /// `backoff * n` after failing.
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Number of snapshot fetches per resync.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

impl Default for ResyncPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(250))
    }
}

/// Why a record was left alone.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// The initial snapshot is not loaded yet
    Unsettled,
    /// The update carried no effective change
    NoChange,
    /// The record vanished before it could be written
    Vanished,
    /// The record failed validation and stays local until the next edit
    Invalid(String),
    /// Temporary identities are never sent to the remote
    Temporary,
    /// Inbound event for a record that is not in the local store
    NotFoundLocally,
    /// Inbound INSERT for a record that is already present
    AlreadyPresent,
    /// The remote row was deleted by someone else; the local copy is dropped
    DeletedRemotely,
}

/// A record the engine decided not to act on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Skipped {
    pub id: Identity,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// A temporary identity replaced by its persistent one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Promotion {
    pub from: Identity,
    pub to: Identity,
}

/// Result of handling one local change event or remote event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    /// Records inserted remotely and promoted locally
    pub promoted: Vec<Promotion>,
    /// Persistent records updated remotely
    pub updated: Vec<Identity>,
    /// Persistent records deleted remotely
    pub deleted: Vec<Identity>,
    /// Remote changes applied to the local store
    pub applied: Vec<Identity>,
    /// Records left alone, with the reason
    pub skipped: Vec<Skipped>,
    /// Whether the local store was overwritten from a snapshot
    pub resynced: bool,
    /// Failures that triggered recovery
    pub errors: Vec<String>,
}

impl SyncReport {
    /// Check if nothing happened.
    pub fn is_empty(&self) -> bool {
        self.promoted.is_empty()
            && self.updated.is_empty()
            && self.deleted.is_empty()
            && self.applied.is_empty()
            && self.skipped.is_empty()
            && !self.resynced
            && self.errors.is_empty()
    }

    /// Total number of remote writes performed.
    pub fn remote_writes(&self) -> usize {
        self.promoted.len() + self.updated.len() + self.deleted.len()
    }

    fn skip(&mut self, id: &Identity, reason: SkipReason) {
        self.skipped.push(Skipped {
            id: id.clone(),
            reason,
        });
    }
}

/// The bidirectional merge logic for one store, one remote and one session.
pub struct Reconciler<S> {
    store: Arc<Mutex<S>>,
    gateway: Arc<dyn RemoteGateway>,
    schema: RecordSchema,
    session: Arc<SyncSession>,
    policy: ResyncPolicy,
    /// Bumped every time a snapshot overwrites the store
    snapshots: AtomicU64,
}

impl<S: LocalStoreAdapter> Reconciler<S> {
    /// Create a reconciler over the people schema with the default policy.
    pub fn new(
        store: Arc<Mutex<S>>,
        gateway: Arc<dyn RemoteGateway>,
        session: Arc<SyncSession>,
    ) -> Self {
        Self {
            store,
            gateway,
            schema: RecordSchema::people(),
            session,
            policy: ResyncPolicy::default(),
            snapshots: AtomicU64::new(0),
        }
    }

    /// Use a different record schema.
    pub fn with_schema(mut self, schema: RecordSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Use a different resync policy.
    pub fn with_policy(mut self, policy: ResyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The session this reconciler checks before acting.
    pub fn session(&self) -> &Arc<SyncSession> {
        &self.session
    }

    /// The record schema used for normalization and validation.
    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// Retry and backoff settings for recovery.
    pub fn policy(&self) -> ResyncPolicy {
        self.policy
    }

    /// Open a new change feed subscription.
    pub async fn resubscribe(&self) -> Result<Subscription> {
        self.ensure_alive()?;
        let subscription = self.gateway.subscribe().await?;
        self.ensure_alive()?;
        Ok(subscription)
    }

    fn store(&self) -> MutexGuard<'_, S> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.session.is_alive() {
            Ok(())
        } else {
            Err(ClientError::Cancelled)
        }
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Propagate a local store change to the remote.
    ///
    /// Remote-origin events are ignored. Nothing is sent before the session
    /// is settled. The first remote failure abandons the rest of the batch
    /// and triggers a full resync.
    pub async fn handle_local_change(&self, event: ChangeEvent) -> SyncReport {
        let mut report = SyncReport::default();

        if event.origin == Origin::Remote || !self.session.is_alive() {
            return report;
        }

        if !self.session.is_settled() {
            for record in event.records() {
                report.skip(&record.id, SkipReason::Unsettled);
            }
            return report;
        }

        let outcome = match event.change {
            Change::Add { .. } | Change::Dataset { .. } => Ok(()),
            Change::Update { updates } => self.push_updates(updates, &mut report).await,
            Change::Remove { records } => self.push_removals(records, &mut report).await,
        };

        if let Err(e) = outcome {
            self.recover(e, &mut report).await;
        }
        report
    }

    async fn push_updates(
        &self,
        updates: Vec<RecordUpdate>,
        report: &mut SyncReport,
    ) -> Result<()> {
        for update in updates {
            self.ensure_alive()?;

            let id = update.record.id;
            if update.changes.is_empty() {
                report.skip(&id, SkipReason::NoChange);
                continue;
            }

            let current = self.store().get_by_id(&id);
            let Some(current) = current else {
                report.skip(&id, SkipReason::Vanished);
                continue;
            };

            if let Err(e) = self.schema.check(&current) {
                tracing::debug!(id = %id, reason = %e, "Record not ready for remote write");
                report.skip(&id, SkipReason::Invalid(e.to_string()));
                continue;
            }

            match id.as_persistent() {
                None => self.insert_and_promote(current, report).await?,
                Some(remote_id) => {
                    let changed: Fields = update
                        .changes
                        .keys()
                        .filter(|name| name.as_str() != IDENTITY_FIELD)
                        .map(|name| {
                            let value = current.get(name).cloned().unwrap_or_default();
                            (name.clone(), value)
                        })
                        .collect();
                    let fields = self.schema.normalize_partial(&changed);
                    if fields.is_empty() {
                        report.skip(&id, SkipReason::NoChange);
                        continue;
                    }

                    match self.gateway.update(remote_id, &fields).await {
                        Ok(()) => {
                            tracing::debug!(id = %id, fields = fields.len(), "Pushed update");
                            report.updated.push(id);
                        }
                        Err(e) if e.is_not_found() => {
                            // The DELETE event may still be on its way
                            tracing::info!(id = %id, "Record deleted remotely, dropping local copy");
                            self.store().remove(std::slice::from_ref(&id), Origin::Remote);
                            report.skip(&id, SkipReason::DeletedRemotely);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
        Ok(())
    }

    /// Insert a temporary record remotely and re-key it in place.
    async fn insert_and_promote(&self, record: Record, report: &mut SyncReport) -> Result<()> {
        let temporary = record.id.clone();
        let sent = self.schema.normalize_fields(&record.fields);
        let snapshots = self.snapshots.load(Ordering::SeqCst);

        let created = self.gateway.insert(&sent).await?;
        self.ensure_alive()?;

        let latest = self.store().get_by_id(&temporary);
        let Some(latest) = latest else {
            report.skip(&temporary, SkipReason::Vanished);
            return self.settle_vanished_insert(created, snapshots, report).await;
        };

        // Edits made while the insert was in flight
        let pending: Fields = self
            .schema
            .normalize_fields(&latest.fields)
            .into_iter()
            .filter(|(name, value)| sent.get(name) != Some(value))
            .filter_map(|(name, _)| latest.get(&name).cloned().map(|raw| (name, raw)))
            .collect();

        let persistent = created.id.clone();
        {
            let mut store = self.store();
            store.replace(&temporary, created, Origin::Remote)?;
            if !pending.is_empty() {
                // Re-emitted as a local edit so it is pushed like any other
                store.update(&persistent, &pending, Origin::Local);
            }
        }

        tracing::info!(from = %temporary, to = %persistent, "Promoted record identity");
        report.promoted.push(Promotion {
            from: temporary,
            to: persistent,
        });
        Ok(())
    }

    /// The temporary record is gone but its insert went through.
    ///
    /// Only a local removal deletes the new row. When a snapshot replaced the
    /// store in the meantime the snapshot stands, and the row is mirrored
    /// locally if the snapshot predates it.
    async fn settle_vanished_insert(
        &self,
        created: Record,
        snapshots_before: u64,
        report: &mut SyncReport,
    ) -> Result<()> {
        let reloaded = self.snapshots.load(Ordering::SeqCst) != snapshots_before;

        if reloaded {
            let mut store = self.store();
            if !store.contains(&created.id) {
                tracing::info!(id = %created.id, "Snapshot predates insert, adding the new row");
                let id = created.id.clone();
                store.add(vec![RecordDraft::from(created)], Origin::Remote);
                report.applied.push(id);
            }
            return Ok(());
        }

        if self.store().contains(&created.id) {
            // The INSERT echo already put it back
            return Ok(());
        }

        tracing::info!(id = %created.id, "Record removed during insert, deleting remote copy");
        if let Some(remote_id) = created.id.as_persistent() {
            self.gateway.delete(remote_id).await?;
            report.deleted.push(created.id);
        }
        Ok(())
    }

    async fn push_removals(&self, records: Vec<Record>, report: &mut SyncReport) -> Result<()> {
        for record in records {
            self.ensure_alive()?;

            let Some(remote_id) = record.id.as_persistent() else {
                report.skip(&record.id, SkipReason::Temporary);
                continue;
            };

            self.gateway.delete(remote_id).await?;
            tracing::debug!(id = %record.id, "Pushed delete");
            report.deleted.push(record.id);
        }
        Ok(())
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Apply a remote change to the local store.
    ///
    /// Applying the same event twice has the same effect as applying it once.
    pub async fn handle_remote_event(&self, event: RemoteEvent) -> SyncReport {
        let mut report = SyncReport::default();
        if !self.session.is_alive() {
            return report;
        }

        if let Err(e) = self.apply_remote(event, &mut report) {
            self.recover(e, &mut report).await;
        }
        report
    }

    /// Recover from a failed change feed item.
    pub async fn handle_feed_error(&self, error: RemoteError) -> SyncReport {
        let mut report = SyncReport::default();
        if self.session.is_alive() {
            self.recover(error.into(), &mut report).await;
        }
        report
    }

    fn apply_remote(&self, event: RemoteEvent, report: &mut SyncReport) -> Result<()> {
        let mut store = self.store();

        match event {
            RemoteEvent::Insert { new } => {
                if store.contains(&new.id) {
                    report.skip(&new.id, SkipReason::AlreadyPresent);
                    return Ok(());
                }
                let id = new.id.clone();
                store.add(vec![RecordDraft::from(new)], Origin::Remote);
                report.applied.push(id);
            }
            RemoteEvent::Update { old, new } => {
                let target = old.map_or_else(|| new.id.clone(), |old| old.id);
                if !store.contains(&target) {
                    tracing::debug!(id = %target, "Remote update for unknown record");
                    report.skip(&target, SkipReason::NotFoundLocally);
                    return Ok(());
                }

                let changes = if target == new.id {
                    store.update(&target, &new.fields, Origin::Remote)
                } else {
                    // Identity itself changed: re-key with the full new row
                    let mut merged = store.get_by_id(&target).unwrap_or_else(|| new.clone());
                    merged.apply(&new.fields);
                    merged.id = new.id.clone();
                    store.replace(&target, merged, Origin::Remote)?
                };

                match changes {
                    Some(changes) if !changes.is_empty() => report.applied.push(new.id),
                    _ => report.skip(&new.id, SkipReason::NoChange),
                }
            }
            RemoteEvent::Delete { old } => {
                if store.remove(std::slice::from_ref(&old.id), Origin::Remote).is_empty() {
                    tracing::debug!(id = %old.id, "Remote delete for unknown record");
                    report.skip(&old.id, SkipReason::NotFoundLocally);
                } else {
                    report.applied.push(old.id);
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    /// Overwrite the local store with the remote snapshot.
    pub async fn resync(&self) -> SyncReport {
        let mut report = SyncReport::default();
        if let Err(e) = self.run_resync(&mut report).await {
            report.errors.push(e.to_string());
        }
        report
    }

    async fn recover(&self, error: ClientError, report: &mut SyncReport) {
        if matches!(error, ClientError::Cancelled) {
            return;
        }

        tracing::warn!(error = %error, "Sync failure, starting full resync");
        report.errors.push(error.to_string());

        if let Err(e) = self.run_resync(report).await {
            report.errors.push(e.to_string());
        }
    }

    async fn run_resync(&self, report: &mut SyncReport) -> Result<usize> {
        let attempts = self.policy.attempts();
        let mut last_error = None;

        for attempt in 1..=attempts {
            self.ensure_alive()?;

            match self.gateway.fetch_all().await {
                Ok(records) => {
                    self.ensure_alive()?;
                    let count = self.store().replace_all(records, Origin::Remote);
                    self.snapshots.fetch_add(1, Ordering::SeqCst);
                    tracing::info!(records = count, attempt, "Resynchronized from remote snapshot");
                    report.resynced = true;
                    return Ok(count);
                }
                Err(e) => {
                    tracing::warn!(attempt, attempts, error = %e, "Snapshot fetch failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.delay_after(attempt)).await;
                    }
                }
            }
        }

        tracing::error!(attempts, "Resync gave up, local store left unchanged");
        Err(last_error.map_or(ClientError::Cancelled, ClientError::from))
    }
}
