//! Journaled, tenant-scoped local store for one entity type.
//!
//! Every mutation runs as a transaction against the in-memory [`Table`]:
//! staged operations are appended to the journal as one frame, then applied
//! to the table, then announced on the store's [`ChangeFeed`]. A failed
//! append leaves the table untouched.
//!
//! User-facing reads and writes always go through the current tenant as
//! returned by the store's [`TenantResolver`]. The `*_for_tenant` and
//! `records_with_status` methods take an explicit tenant and exist for the
//! sync engine, which resolves the tenant once per pass.

use crate::change_feed::{ChangeEvent, ChangeFeed, Origin, StoreSignal, SyncRequest};
use crate::config::StoreConfig;
use crate::connectivity::Connectivity;
use crate::error::{CoreError, CoreResult};
use crate::journal::{decode_cbor, encode_cbor, FrameType, Journal};
use crate::live::LiveQuery;
use crate::table::{Table, TableOp, Transaction};
use crate::tenant::TenantResolver;
use crate::types::{Entity, Record, StatusCounts, SyncStatus, TenantId, Timestamp};
use fieldsync_storage::StorageBackend;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A persisted, indexed table of `T` records.
///
/// Cloning is cheap and every clone shares the same table.
pub struct LocalStore<T: Entity> {
    inner: Arc<StoreInner<T>>,
}

impl<T: Entity> Clone for LocalStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct StoreInner<T: Entity> {
    table: RwLock<Table<T>>,
    journal: Journal,
    config: StoreConfig,
    tenants: Arc<dyn TenantResolver>,
    connectivity: Connectivity,
    feed: ChangeFeed,
    initial_sync_requested: Mutex<HashSet<TenantId>>,
    /// Last timestamp handed out by [`StoreInner::stamp`].
    clock: Mutex<Timestamp>,
}

impl<T: Entity> StoreInner<T> {
    /// Returns a mutation timestamp later than `previous` and later than any
    /// timestamp this store handed out before.
    fn stamp(&self, previous: Timestamp) -> Timestamp {
        let mut last = self.clock.lock();
        *last = Timestamp::next_after((*last).max(previous));
        *last
    }

    /// Fires the one-time initial sync request for an empty tenant.
    fn note_query(&self, tenant_id: &TenantId) {
        if self.table.read().tenant_len(tenant_id) > 0 || !self.connectivity.is_online() {
            return;
        }
        if self.initial_sync_requested.lock().insert(tenant_id.clone()) {
            info!(kind = T::KIND, tenant = %tenant_id, "no local rows, requesting initial sync");
            self.feed.emit(StoreSignal::Sync(SyncRequest::Initial {
                tenant_id: tenant_id.clone(),
            }));
        }
    }
}

impl<T: Entity> LocalStore<T> {
    /// Opens a store over `backend`, replaying its journal.
    ///
    /// # Errors
    ///
    /// Fails if the journal cannot be read or holds corruption that is not
    /// a torn tail.
    pub fn open(
        backend: Box<dyn StorageBackend>,
        config: StoreConfig,
        tenants: Arc<dyn TenantResolver>,
        connectivity: Connectivity,
    ) -> CoreResult<Self> {
        let journal = Journal::new(backend, config.sync_on_commit);
        let table = replay_table::<T>(&journal)?;
        debug!(
            kind = T::KIND,
            frames = journal.frame_count(),
            records = table.len(),
            "store opened"
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                table: RwLock::new(table),
                journal,
                config,
                tenants,
                connectivity,
                feed: ChangeFeed::new(),
                initial_sync_requested: Mutex::new(HashSet::new()),
                clock: Mutex::new(Timestamp::default()),
            }),
        })
    }

    /// The entity kind stored here.
    pub fn kind(&self) -> &'static str {
        T::KIND
    }

    /// Resolves the current tenant.
    pub async fn current_tenant(&self) -> Option<TenantId> {
        self.inner.tenants.current_tenant_id().await
    }

    /// The connectivity signal this store was opened with.
    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    /// Subscribes to the store's change feed.
    pub fn subscribe(&self) -> UnboundedReceiver<StoreSignal> {
        self.inner.feed.subscribe()
    }

    /// Makes every live query re-resolve its tenant and re-run. Call after
    /// switching tenants.
    pub fn refresh_queries(&self) {
        self.inner.feed.emit(StoreSignal::Refresh);
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Adds a record with a generated id for the current tenant.
    ///
    /// Returns `Ok(None)` without writing anything when no tenant is
    /// resolvable.
    pub async fn add(&self, data: T) -> CoreResult<Option<Record<T>>> {
        self.add_with_id(Uuid::new_v4().to_string(), data).await
    }

    /// Adds a record with a caller-chosen id for the current tenant.
    ///
    /// Returns `Ok(None)` when no tenant is resolvable.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::InvalidOperation`] if the tenant already has
    /// a record with this id.
    pub async fn add_with_id(
        &self,
        id: impl Into<String>,
        data: T,
    ) -> CoreResult<Option<Record<T>>> {
        let id = id.into();
        let Some(tenant_id) = self.current_tenant().await else {
            warn!(kind = T::KIND, %id, "add skipped: no tenant");
            return Ok(None);
        };

        let now = self.inner.stamp(Timestamp::default());
        let record = Record {
            id,
            tenant_id,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Queued,
            sync_error: None,
            data,
        };
        self.transaction(Origin::Local, |txn| {
            if txn.get(&record.tenant_id, &record.id).is_some() {
                return Err(CoreError::invalid_operation(format!(
                    "{} record {} already exists",
                    T::KIND,
                    record.id
                )));
            }
            txn.put(record.clone());
            Ok(())
        })?;
        debug!(kind = T::KIND, tenant = %record.tenant_id, id = %record.id, "record added");
        Ok(Some(record))
    }

    /// Applies `mutate` to a record of the current tenant and queues it for
    /// upload.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NoTenant`] if no tenant is resolvable
    /// - [`CoreError::NotFound`] if the tenant has no record `id`
    /// - [`CoreError::InvalidState`] if the record is pending deletion or archived
    pub async fn update<F>(&self, id: &str, mutate: F) -> CoreResult<Record<T>>
    where
        F: FnOnce(&mut T),
    {
        let tenant_id = self.current_tenant().await.ok_or(CoreError::NoTenant)?;
        self.transaction(Origin::Local, |txn| {
            let mut record = txn.get(&tenant_id, id).ok_or_else(|| CoreError::NotFound {
                kind: T::KIND,
                id: id.to_string(),
            })?;
            if !record.sync_status.is_mutable() {
                return Err(CoreError::InvalidState {
                    kind: T::KIND,
                    id: id.to_string(),
                    status: record.sync_status,
                });
            }
            mutate(&mut record.data);
            record.updated_at = self.inner.stamp(record.updated_at);
            record.mark(SyncStatus::Queued, None);
            txn.put(record.clone());
            Ok(record)
        })
    }

    /// Marks a record of the current tenant for deletion.
    ///
    /// Returns false, and logs, when there is nothing to remove.
    pub async fn remove(&self, id: &str) -> CoreResult<bool> {
        let Some(tenant_id) = self.current_tenant().await else {
            warn!(kind = T::KIND, %id, "remove skipped: no tenant");
            return Ok(false);
        };
        let removed = self.transaction(Origin::Local, |txn| {
            match txn.get(&tenant_id, id) {
                Some(mut record) if record.sync_status != SyncStatus::PendingDelete => {
                    record.updated_at = self.inner.stamp(record.updated_at);
                    record.mark(SyncStatus::PendingDelete, None);
                    txn.put(record);
                    Ok(true)
                }
                _ => Ok(false),
            }
        })?;
        if !removed {
            debug!(kind = T::KIND, tenant = %tenant_id, %id, "remove: no such record");
        }
        Ok(removed)
    }

    /// Removes every record of the current tenant in one batch.
    ///
    /// With `delete_remote` the records are marked for remote deletion;
    /// otherwise only the local rows are cleared and nothing is sent to the
    /// server. Returns the number of affected records.
    pub async fn remove_all(&self, delete_remote: bool) -> CoreResult<usize> {
        let Some(tenant_id) = self.current_tenant().await else {
            warn!(kind = T::KIND, "remove_all skipped: no tenant");
            return Ok(0);
        };

        let count = if delete_remote {
            let records = self.records_with_status(&tenant_id, &SyncStatus::ALL);
            self.transaction(Origin::Local, |txn| {
                let mut marked = 0;
                for mut record in records {
                    if record.sync_status == SyncStatus::PendingDelete {
                        continue;
                    }
                    record.updated_at = self.inner.stamp(record.updated_at);
                    record.mark(SyncStatus::PendingDelete, None);
                    txn.put(record);
                    marked += 1;
                }
                Ok(marked)
            })?
        } else {
            let count = self.inner.table.read().tenant_len(&tenant_id);
            self.commit(Origin::Local, false, |txn| {
                txn.clear_tenant(&tenant_id);
                Ok(())
            })?;
            count
        };
        info!(kind = T::KIND, tenant = %tenant_id, count, delete_remote, "removed all records");
        Ok(count)
    }

    /// Marks a record as archived; the sync engine performs the remote
    /// archive side-effect and then removes it locally.
    ///
    /// # Errors
    ///
    /// Same as [`update`](Self::update), except that archiving an already
    /// archived record returns it unchanged.
    pub async fn archive(&self, id: &str) -> CoreResult<Record<T>> {
        let tenant_id = self.current_tenant().await.ok_or(CoreError::NoTenant)?;
        self.transaction(Origin::Local, |txn| {
            let mut record = txn.get(&tenant_id, id).ok_or_else(|| CoreError::NotFound {
                kind: T::KIND,
                id: id.to_string(),
            })?;
            match record.sync_status {
                SyncStatus::Archived => Ok(record),
                SyncStatus::PendingDelete => Err(CoreError::InvalidState {
                    kind: T::KIND,
                    id: id.to_string(),
                    status: record.sync_status,
                }),
                _ => {
                    record.updated_at = self.inner.stamp(record.updated_at);
                    record.mark(SyncStatus::Archived, None);
                    txn.put(record.clone());
                    Ok(record)
                }
            }
        })
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Returns a visible record of the current tenant.
    pub async fn get(&self, id: &str) -> Option<Record<T>> {
        let tenant_id = self.current_tenant().await?;
        self.inner.note_query(&tenant_id);
        self.inner
            .table
            .read()
            .get(&tenant_id, id)
            .filter(|r| r.sync_status.is_visible())
            .cloned()
    }

    /// Returns the current tenant's visible records, newest first.
    pub async fn list(&self) -> Vec<Record<T>> {
        let Some(tenant_id) = self.current_tenant().await else {
            return Vec::new();
        };
        self.inner.note_query(&tenant_id);
        self.inner.table.read().visible(&tenant_id)
    }

    /// Per-status counts for the current tenant.
    pub async fn status_counts(&self) -> StatusCounts {
        match self.current_tenant().await {
            Some(tenant_id) => self.inner.table.read().status_counts(&tenant_id),
            None => StatusCounts::default(),
        }
    }

    /// Live version of [`list`](Self::list).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn watch_list(&self) -> LiveQuery<Vec<Record<T>>> {
        let inner = self.inner.clone();
        LiveQuery::spawn(self.subscribe(), self.inner.tenants.clone(), move |tenant| {
            let Some(tenant_id) = tenant else {
                return Vec::new();
            };
            inner.note_query(tenant_id);
            inner.table.read().visible(tenant_id)
        })
    }

    /// Live version of [`get`](Self::get).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn watch_get(&self, id: impl Into<String>) -> LiveQuery<Option<Record<T>>> {
        let id = id.into();
        let inner = self.inner.clone();
        LiveQuery::spawn(self.subscribe(), self.inner.tenants.clone(), move |tenant| {
            let tenant_id = tenant?;
            inner.note_query(tenant_id);
            inner
                .table
                .read()
                .get(tenant_id, &id)
                .filter(|r| r.sync_status.is_visible())
                .cloned()
        })
    }

    /// Live version of [`status_counts`](Self::status_counts).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn watch_status_counts(&self) -> LiveQuery<StatusCounts> {
        let inner = self.inner.clone();
        LiveQuery::spawn(self.subscribe(), self.inner.tenants.clone(), move |tenant| {
            tenant
                .map(|t| inner.table.read().status_counts(t))
                .unwrap_or_default()
        })
    }

    // ========================================================================
    // Sync engine API
    // ========================================================================

    /// Records of `tenant_id` in any of `statuses`.
    pub fn records_with_status(
        &self,
        tenant_id: &TenantId,
        statuses: &[SyncStatus],
    ) -> Vec<Record<T>> {
        self.inner.table.read().with_status(tenant_id, statuses)
    }

    /// Looks up a record of `tenant_id` whatever its status.
    pub fn get_for_tenant(&self, tenant_id: &TenantId, id: &str) -> Option<Record<T>> {
        self.inner.table.read().get(tenant_id, id).cloned()
    }

    /// Requeues every failed record of `tenant_id`. Returns how many.
    pub fn reset_failed(&self, tenant_id: &TenantId) -> CoreResult<usize> {
        let failed = self.records_with_status(tenant_id, &[SyncStatus::Failed]);
        let count = failed.len();
        if count == 0 {
            return Ok(0);
        }
        self.transaction(Origin::Sync, |txn| {
            for mut record in failed {
                record.mark(SyncStatus::Queued, None);
                txn.put(record);
            }
            Ok(())
        })?;
        debug!(kind = T::KIND, tenant = %tenant_id, count, "requeued failed records");
        Ok(count)
    }

    /// Runs `f` as one atomic, durable transaction.
    ///
    /// Nothing is written if `f` fails. Local-origin commits also ask the
    /// sync engine for a debounced sync.
    pub fn transaction<R>(
        &self,
        origin: Origin,
        f: impl FnOnce(&mut Transaction<'_, T>) -> CoreResult<R>,
    ) -> CoreResult<R> {
        self.commit(origin, origin == Origin::Local, f)
    }

    /// Tenants with at least one row.
    pub fn tenants(&self) -> Vec<TenantId> {
        self.inner.table.read().tenants()
    }

    /// Total number of rows across all tenants.
    pub fn len(&self) -> usize {
        self.inner.table.read().len()
    }

    /// Returns true if the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.inner.table.read().is_empty()
    }

    /// Per-status counts for an explicit tenant.
    pub fn status_counts_for(&self, tenant_id: &TenantId) -> StatusCounts {
        self.inner.table.read().status_counts(tenant_id)
    }

    /// Number of frames in the journal.
    pub fn frame_count(&self) -> usize {
        self.inner.journal.frame_count()
    }

    /// Size of the journal in bytes.
    pub fn journal_size(&self) -> CoreResult<u64> {
        self.inner.journal.size()
    }

    /// Rewrites the journal as a single snapshot of the current table.
    pub fn compact(&self) -> CoreResult<()> {
        let table = self.inner.table.read();
        let records = table.records();
        self.inner
            .journal
            .rewrite(FrameType::Snapshot, &encode_cbor(&records)?)?;
        info!(kind = T::KIND, records = records.len(), "journal compacted");
        Ok(())
    }

    fn commit<R>(
        &self,
        origin: Origin,
        request_sync: bool,
        f: impl FnOnce(&mut Transaction<'_, T>) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let (result, changes) = {
            let mut table = self.inner.table.write();
            let mut txn = Transaction::new(&table);
            let result = f(&mut txn)?;
            let ops = txn.into_ops();
            if ops.is_empty() {
                return Ok(result);
            }

            self.inner
                .journal
                .append(FrameType::Batch, &encode_cbor(&ops)?)?;

            let mut changes: BTreeMap<TenantId, Vec<String>> = BTreeMap::new();
            for op in ops {
                match op {
                    TableOp::Put(record) => {
                        changes
                            .entry(record.tenant_id.clone())
                            .or_default()
                            .push(record.id.clone());
                        table.put(record);
                    }
                    TableOp::Delete { tenant_id, id } => {
                        table.delete(&tenant_id, &id);
                        changes.entry(tenant_id).or_default().push(id);
                    }
                    TableOp::ClearTenant { tenant_id } => {
                        let ids = table.clear_tenant(&tenant_id);
                        changes.entry(tenant_id).or_default().extend(ids);
                    }
                }
            }
            (result, changes)
        };

        for (tenant_id, ids) in changes {
            self.inner.feed.emit(StoreSignal::Changed(ChangeEvent {
                kind: T::KIND,
                tenant_id: tenant_id.clone(),
                origin,
                ids,
            }));
            if request_sync {
                self.inner
                    .feed
                    .emit(StoreSignal::Sync(SyncRequest::Debounced { tenant_id }));
            }
        }

        if let Some(threshold) = self.inner.config.compact_after_frames {
            if self.inner.journal.frame_count() >= threshold {
                if let Err(err) = self.compact() {
                    warn!(kind = T::KIND, error = %err, "automatic compaction failed");
                }
            }
        }
        Ok(result)
    }
}

/// Rebuilds a table by replaying every frame of `journal`.
pub(crate) fn replay_table<V>(journal: &Journal) -> CoreResult<Table<V>>
where
    V: DeserializeOwned + Clone,
{
    let mut table = Table::new();
    for frame in journal.replay()? {
        match frame.frame_type {
            FrameType::Batch => {
                let ops: Vec<TableOp<V>> = decode_cbor(&frame.payload)?;
                for op in ops {
                    table.apply(op);
                }
            }
            FrameType::Snapshot => {
                let records: Vec<Record<V>> = decode_cbor(&frame.payload)?;
                table = Table::from_records(records);
            }
        }
    }
    Ok(table)
}
