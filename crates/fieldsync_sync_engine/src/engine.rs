//! Per-entity sync engine.
//!
//! One pass reconciles a [`LocalStore`] with its [`RemoteAdapter`] for the
//! current tenant in three phases, each committed as one local transaction:
//!
//! 1. **Delete**: push pending deletions and archive side-effects
//! 2. **Pull**: fetch remote records (delta when a last-sync time is known)
//!    and merge them last-writer-wins
//! 3. **Push**: upload queued and failed records
//!
//! Per-record failures are stored on the record and never abort a pass.

use crate::config::EngineConfig;
use crate::coordinator::SyncTarget;
use crate::debounce::Debouncer;
use crate::error::{RemoteError, RemoteResult, SyncError, SyncResult};
use crate::remote::{ListOptions, RemoteAdapter};
use crate::retry::retry_with_backoff_notify;
use crate::task::TaskHandle;
use async_trait::async_trait;
use fieldsync_core::{
    remote_wins, Entity, LocalStore, Origin, Record, StoreSignal, SyncMetaStore, SyncRequest,
    SyncStatus, TenantId, Timestamp,
};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// The current state of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No pass has run yet.
    Idle,
    /// Pushing deletions and archive side-effects.
    Deleting,
    /// Pulling remote records.
    Pulling,
    /// Pushing local records.
    Pushing,
    /// The last pass completed.
    Synced,
    /// The last pass failed.
    Error,
    /// Waiting before a retry.
    RetryWait,
}

impl SyncState {
    /// Returns true while a pass is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Deleting | SyncState::Pulling | SyncState::Pushing
        )
    }
}

/// How a pass reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Pulled the whole remote set.
    Full,
    /// Pulled records changed since the last sync.
    Delta,
    /// The adapter's own reconciliation ran.
    Bespoke,
    /// Another pass held the lock; nothing ran.
    Skipped,
}

/// Outcome of one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// How the pass reconciled.
    pub mode: SyncMode,
    /// Rows removed after a confirmed remote deletion or archive.
    pub deleted: usize,
    /// Deletions or archives the remote rejected.
    pub delete_failures: usize,
    /// Remote records inserted or taken over locally.
    pub pulled: usize,
    /// Remote records ignored: pending deletion locally, or not newer.
    pub pull_skipped: usize,
    /// Records the remote accepted.
    pub pushed: usize,
    /// Records the remote rejected, now `Failed`.
    pub push_failures: usize,
    /// Wall time of the pass.
    pub duration: Duration,
}

impl SyncReport {
    /// An empty report for `mode`.
    pub fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            deleted: 0,
            delete_failures: 0,
            pulled: 0,
            pull_skipped: 0,
            pushed: 0,
            push_failures: 0,
            duration: Duration::ZERO,
        }
    }

    /// The report of a pass that did not run.
    pub fn skipped() -> Self {
        Self::new(SyncMode::Skipped)
    }

    /// Returns true if the pass did not run.
    pub fn is_skipped(&self) -> bool {
        self.mode == SyncMode::Skipped
    }

    /// Per-record failures in this pass.
    pub fn failures(&self) -> usize {
        self.delete_failures + self.push_failures
    }
}

/// Cumulative statistics of an engine.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes that completed.
    pub passes_completed: u64,
    /// Passes that failed.
    pub passes_failed: u64,
    /// Calls that found a pass already running.
    pub passes_skipped: u64,
    /// Records pulled.
    pub records_pulled: u64,
    /// Records pushed.
    pub records_pushed: u64,
    /// Rows removed after remote deletion.
    pub records_deleted: u64,
    /// Per-record push and delete failures.
    pub record_failures: u64,
    /// Backoff retries in [`EntitySyncEngine::force_sync`].
    pub retries: u64,
    /// Start time of the last completed pass.
    pub last_sync: Option<Timestamp>,
    /// Last pass-level error.
    pub last_error: Option<String>,
}

/// Reconciles one entity type's local store with its remote.
///
/// Cloning is cheap and every clone shares the same lock, so at most one
/// pass runs per store however many clones call it.
pub struct EntitySyncEngine<T: Entity> {
    inner: Arc<EngineInner<T>>,
}

impl<T: Entity> Clone for EntitySyncEngine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct EngineInner<T: Entity> {
    store: LocalStore<T>,
    remote: Arc<dyn RemoteAdapter<T>>,
    meta: Arc<SyncMetaStore>,
    config: EngineConfig,
    lock: tokio::sync::Mutex<()>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
}

impl<T: Entity> EntitySyncEngine<T> {
    /// Creates an engine for `store`, recording last-sync times in `meta`.
    pub fn new(
        store: LocalStore<T>,
        remote: Arc<dyn RemoteAdapter<T>>,
        meta: Arc<SyncMetaStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                remote,
                meta,
                config,
                lock: tokio::sync::Mutex::new(()),
                state: RwLock::new(SyncState::Idle),
                stats: RwLock::new(SyncStats::default()),
            }),
        }
    }

    /// The store this engine reconciles.
    pub fn store(&self) -> &LocalStore<T> {
        &self.inner.store
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The current state.
    pub fn state(&self) -> SyncState {
        *self.inner.state.read()
    }

    /// Cumulative statistics.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Returns true while a pass holds the lock.
    pub fn is_syncing(&self) -> bool {
        self.inner.lock.try_lock().is_err()
    }

    fn set_state(&self, state: SyncState) {
        *self.inner.state.write() = state;
    }

    // ========================================================================
    // Passes
    // ========================================================================

    /// Runs one reconciliation pass for the current tenant.
    ///
    /// If a pass is already running on this store, returns a
    /// [`SyncMode::Skipped`] report at once instead of waiting.
    ///
    /// # Errors
    ///
    /// [`SyncError::NoTenant`] when no tenant resolves, or the first local
    /// or listing failure. The last-sync time only advances on success.
    pub async fn sync_with_server(&self) -> SyncResult<SyncReport> {
        let Ok(_guard) = self.inner.lock.try_lock() else {
            debug!(kind = T::KIND, "sync already running, skipping");
            self.inner.stats.write().passes_skipped += 1;
            return Ok(SyncReport::skipped());
        };

        let started = Instant::now();
        let result = self.run_pass().await;

        match &result {
            Ok(report) => {
                self.set_state(SyncState::Synced);
                let mut stats = self.inner.stats.write();
                stats.passes_completed += 1;
                stats.records_pulled += report.pulled as u64;
                stats.records_pushed += report.pushed as u64;
                stats.records_deleted += report.deleted as u64;
                stats.record_failures += report.failures() as u64;
                stats.last_error = None;
            }
            Err(err) => {
                warn!(kind = T::KIND, error = %err, "sync pass failed");
                self.set_state(SyncState::Error);
                let mut stats = self.inner.stats.write();
                stats.passes_failed += 1;
                stats.last_error = Some(err.to_string());
            }
        }

        result.map(|mut report| {
            report.duration = started.elapsed();
            info!(
                kind = T::KIND,
                mode = ?report.mode,
                deleted = report.deleted,
                pulled = report.pulled,
                pushed = report.pushed,
                failures = report.failures(),
                duration_ms = report.duration.as_millis() as u64,
                "sync pass complete"
            );
            report
        })
    }

    /// Requeues failed records, then runs a pass with retry and backoff.
    ///
    /// Only retryable failures are retried; anything else returns after the
    /// first attempt.
    pub async fn force_sync(&self) -> SyncResult<SyncReport> {
        if let Some(tenant_id) = self.inner.store.current_tenant().await {
            let requeued = self.inner.store.reset_failed(&tenant_id)?;
            if requeued > 0 {
                info!(kind = T::KIND, tenant = %tenant_id, requeued, "requeued failed records");
            }
        }

        retry_with_backoff_notify(
            &self.inner.config.retry,
            T::KIND,
            || self.sync_with_server(),
            |_, _| {
                self.set_state(SyncState::RetryWait);
                self.inner.stats.write().retries += 1;
            },
        )
        .await
    }

    async fn run_pass(&self) -> SyncResult<SyncReport> {
        let tenant_id = self
            .inner
            .store
            .current_tenant()
            .await
            .ok_or(SyncError::NoTenant)?;

        if let Some(custom) = self.inner.remote.custom_sync() {
            debug!(kind = T::KIND, tenant = %tenant_id, "running bespoke sync");
            self.set_state(SyncState::Pulling);
            let mut report = custom.sync_with_server(&self.inner.store, &tenant_id).await?;
            report.mode = SyncMode::Bespoke;
            return Ok(report);
        }

        let sync_start = Timestamp::now();
        let mut report = SyncReport::new(SyncMode::Full);

        self.set_state(SyncState::Deleting);
        self.delete_phase(&tenant_id, &mut report).await?;

        self.set_state(SyncState::Pulling);
        let remote_ids = self.pull_phase(&tenant_id, &mut report).await?;

        self.set_state(SyncState::Pushing);
        self.push_phase(&tenant_id, &remote_ids, &mut report).await?;

        self.inner
            .meta
            .set_last_sync(T::KIND, &tenant_id, sync_start)?;
        self.inner.stats.write().last_sync = Some(sync_start);
        Ok(report)
    }

    // ========================================================================
    // Phases
    // ========================================================================

    async fn delete_phase(&self, tenant_id: &TenantId, report: &mut SyncReport) -> SyncResult<()> {
        let pending = self.inner.store.records_with_status(
            tenant_id,
            &[SyncStatus::PendingDelete, SyncStatus::Archived],
        );
        if pending.is_empty() {
            return Ok(());
        }
        debug!(kind = T::KIND, tenant = %tenant_id, count = pending.len(), "delete phase");

        let remote = &self.inner.remote;
        let outcomes: Vec<(Record<T>, RemoteResult<()>)> = stream::iter(pending)
            .map(|record| async move {
                let result = if record.sync_status == SyncStatus::Archived {
                    remote.archive(&record.id).await
                } else {
                    remote.delete(&record.id).await
                };
                // Already gone remotely is as good as deleted.
                let result = match result {
                    Err(RemoteError::NotFound(_)) => Ok(()),
                    other => other,
                };
                (record, result)
            })
            .buffer_unordered(self.inner.config.concurrency_limit())
            .collect()
            .await;

        self.inner.store.transaction(Origin::Sync, |txn| {
            for (record, result) in outcomes {
                let current = txn.get(tenant_id, &record.id).filter(|r| {
                    matches!(
                        r.sync_status,
                        SyncStatus::PendingDelete | SyncStatus::Archived
                    )
                });
                match result {
                    Ok(()) => {
                        if current.is_some() {
                            txn.delete(tenant_id, &record.id);
                            report.deleted += 1;
                        }
                    }
                    Err(err) => {
                        warn!(kind = T::KIND, id = %record.id, error = %err, "remote delete failed");
                        report.delete_failures += 1;
                        if let Some(mut current) = current {
                            current.sync_error = Some(err.to_string());
                            txn.put(current);
                        }
                    }
                }
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Returns the ids of this tenant's records in the fetched remote set.
    async fn pull_phase(
        &self,
        tenant_id: &TenantId,
        report: &mut SyncReport,
    ) -> SyncResult<HashSet<String>> {
        let options = match self.inner.meta.get_last_sync(T::KIND, tenant_id) {
            Some(since) => {
                report.mode = SyncMode::Delta;
                ListOptions::since(since)
            }
            None => ListOptions::full(),
        };
        debug!(kind = T::KIND, tenant = %tenant_id, since = ?options.since, "pull phase");

        let fetched = self.inner.remote.list(options).await?;
        let remote_records: Vec<Record<T>> = fetched
            .into_iter()
            .filter(|r| &r.tenant_id == tenant_id)
            .collect();
        let remote_ids = remote_records.iter().map(|r| r.id.clone()).collect();

        self.inner.store.transaction(Origin::Sync, |txn| {
            for mut remote in remote_records {
                let take = match txn.get(tenant_id, &remote.id) {
                    None => true,
                    Some(local) => remote_wins(&local, remote.updated_at),
                };
                if take {
                    remote.mark(SyncStatus::Synced, None);
                    txn.put(remote);
                    report.pulled += 1;
                } else {
                    report.pull_skipped += 1;
                }
            }
            Ok(())
        })?;
        Ok(remote_ids)
    }

    async fn push_phase(
        &self,
        tenant_id: &TenantId,
        remote_ids: &HashSet<String>,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let pending = self
            .inner
            .store
            .records_with_status(tenant_id, &SyncStatus::PUSHABLE);
        if pending.is_empty() {
            return Ok(());
        }
        debug!(kind = T::KIND, tenant = %tenant_id, count = pending.len(), "push phase");

        let remote = self.inner.remote.as_ref();
        let outcomes: Vec<(Record<T>, RemoteResult<Record<T>>)> = stream::iter(pending)
            .map(|record| async move {
                let likely_exists = remote_ids.contains(&record.id) || record.was_edited();
                let result = push_record(remote, &record, likely_exists).await;
                (record, result)
            })
            .buffer_unordered(self.inner.config.concurrency_limit())
            .collect()
            .await;

        self.inner.store.transaction(Origin::Sync, |txn| {
            for (pushed, result) in outcomes {
                if let Err(err) = &result {
                    warn!(kind = T::KIND, id = %pushed.id, error = %err, "push failed");
                    report.push_failures += 1;
                }
                // Edited or deleted while the call was in flight: leave the
                // newer local state for the next pass.
                let Some(mut current) = txn
                    .get(tenant_id, &pushed.id)
                    .filter(|r| r.updated_at == pushed.updated_at && r.sync_status.is_mutable())
                else {
                    continue;
                };
                match result {
                    Ok(mut confirmed) => {
                        confirmed.tenant_id = tenant_id.clone();
                        confirmed.mark(SyncStatus::Synced, None);
                        txn.put(confirmed);
                        report.pushed += 1;
                    }
                    Err(err) => {
                        current.mark(SyncStatus::Failed, Some(err.to_string()));
                        txn.put(current);
                    }
                }
            }
            Ok(())
        })?;
        Ok(())
    }

    // ========================================================================
    // Auto-sync
    // ========================================================================

    /// Starts a background task that syncs in response to the store's
    /// change feed.
    ///
    /// Local mutations are debounced by [`EngineConfig::debounce_window`];
    /// an initial-sync request runs a pass at once. Both are skipped while
    /// offline. Dropping the handle stops the task.
    pub fn spawn_auto_sync(&self) -> TaskHandle {
        let mut signals = self.inner.store.subscribe();
        let engine = self.clone();

        let debounced = {
            let engine = engine.clone();
            Debouncer::new(self.inner.config.debounce_window, move || {
                let engine = engine.clone();
                async move { engine.sync_if_online("debounced").await }
            })
        };

        TaskHandle::spawn(async move {
            while let Some(signal) = signals.recv().await {
                match signal {
                    StoreSignal::Sync(SyncRequest::Debounced { .. }) => debounced.trigger(),
                    StoreSignal::Sync(SyncRequest::Initial { tenant_id }) => {
                        info!(kind = T::KIND, tenant = %tenant_id, "initial sync requested");
                        engine.sync_if_online("initial").await;
                    }
                    StoreSignal::Changed(_) | StoreSignal::Refresh => {}
                }
            }
        })
    }

    async fn sync_if_online(&self, trigger: &'static str) {
        if !self.inner.store.connectivity().is_online() {
            debug!(kind = T::KIND, trigger, "offline, sync deferred");
            return;
        }
        if let Err(err) = self.sync_with_server().await {
            warn!(kind = T::KIND, trigger, error = %err, "background sync failed");
        }
    }
}

/// Pushes one record, falling back between create and update when the
/// remote disagrees with the guess.
async fn push_record<T: Entity>(
    remote: &dyn RemoteAdapter<T>,
    record: &Record<T>,
    likely_exists: bool,
) -> RemoteResult<Record<T>> {
    if likely_exists {
        match remote.update(record).await {
            Err(RemoteError::NotFound(_)) => {
                debug!(kind = T::KIND, id = %record.id, "update found nothing, creating");
                remote.create(record).await
            }
            other => other,
        }
    } else {
        match remote.create(record).await {
            Err(RemoteError::AlreadyExists(_)) => {
                debug!(kind = T::KIND, id = %record.id, "create conflicted, updating");
                remote.update(record).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl<T: Entity> SyncTarget for EntitySyncEngine<T> {
    fn name(&self) -> &str {
        T::KIND
    }

    async fn force_sync(&self) -> SyncResult<SyncReport> {
        EntitySyncEngine::force_sync(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::mock::{MockRemote, RemoteOp};
    use fieldsync_core::{
        Connectivity, Section, StaticTenant, StoreConfig, TenantResolver,
    };
    use fieldsync_storage::InMemoryBackend;

    struct Fixture {
        engine: EntitySyncEngine<Section>,
        store: LocalStore<Section>,
        remote: Arc<MockRemote<Section>>,
        meta: Arc<SyncMetaStore>,
        tenants: Arc<StaticTenant>,
    }

    fn fixture() -> Fixture {
        fixture_with(EngineConfig::default().with_retry(RetryConfig::new(3).with_jitter(0.0)))
    }

    fn fixture_with(config: EngineConfig) -> Fixture {
        let tenants = Arc::new(StaticTenant::new(Some(TenantId::new("t1"))));
        let store = LocalStore::open(
            Box::new(InMemoryBackend::new()),
            StoreConfig::default(),
            tenants.clone() as Arc<dyn TenantResolver>,
            Connectivity::new(true),
        )
        .unwrap();
        let meta = Arc::new(SyncMetaStore::open(Box::new(InMemoryBackend::new()), true).unwrap());
        let remote = Arc::new(MockRemote::new());
        let engine = EntitySyncEngine::new(
            store.clone(),
            remote.clone() as Arc<dyn RemoteAdapter<Section>>,
            meta.clone(),
            config,
        );
        Fixture {
            engine,
            store,
            remote,
            meta,
            tenants,
        }
    }

    fn section(name: &str) -> Section {
        Section {
            name: name.into(),
            ..Section::default()
        }
    }

    fn remote_record(id: &str, tenant: &str, updated_at: i64, name: &str) -> Record<Section> {
        Record {
            id: id.into(),
            tenant_id: TenantId::new(tenant),
            created_at: Timestamp::from_millis(1),
            updated_at: Timestamp::from_millis(updated_at),
            sync_status: SyncStatus::Synced,
            sync_error: None,
            data: section(name),
        }
    }

    #[tokio::test]
    async fn push_creates_new_records() {
        let f = fixture();
        let record = f.store.add(section("Kitchen")).await.unwrap().unwrap();

        let report = f.engine.sync_with_server().await.unwrap();
        assert_eq!(report.mode, SyncMode::Full);
        assert_eq!(report.pushed, 1);
        assert_eq!(f.remote.calls(RemoteOp::Create), 1);
        assert_eq!(f.remote.calls(RemoteOp::Update), 0);

        let local = f.store.get(&record.id).await.unwrap();
        assert_eq!(local.sync_status, SyncStatus::Synced);
        assert_eq!(f.engine.state(), SyncState::Synced);
    }

    #[tokio::test]
    async fn edited_records_update_first() {
        let f = fixture();
        let record = f.store.add(section("Kitchen")).await.unwrap().unwrap();
        f.engine.sync_with_server().await.unwrap();
        f.remote.reset_calls();

        f.store
            .update(&record.id, |s| s.name = "Hall".into())
            .await
            .unwrap();
        f.engine.sync_with_server().await.unwrap();

        assert_eq!(f.remote.calls(RemoteOp::Update), 1);
        assert_eq!(f.remote.calls(RemoteOp::Create), 0);
        assert_eq!(f.remote.remote_record(&record.id).unwrap().data.name, "Hall");
    }

    #[tokio::test]
    async fn create_conflict_falls_back_to_update() {
        let f = fixture();
        let record = f.store.add(section("Kitchen")).await.unwrap().unwrap();
        // Exists remotely but outside this delta window.
        f.meta
            .set_last_sync(Section::KIND, &TenantId::new("t1"), Timestamp::now())
            .unwrap();
        f.remote
            .insert_remote(remote_record(&record.id, "t1", 1, "Kitchen"));

        let report = f.engine.sync_with_server().await.unwrap();
        assert_eq!(report.mode, SyncMode::Delta);
        assert_eq!(
            f.remote.call_log()[1..].to_vec(),
            vec![
                (RemoteOp::Create, Some(record.id.clone())),
                (RemoteOp::Update, Some(record.id.clone())),
            ]
        );
        assert_eq!(
            f.store.get(&record.id).await.unwrap().sync_status,
            SyncStatus::Synced
        );
    }

    #[tokio::test]
    async fn pull_is_last_writer_wins() {
        let f = fixture();
        let mine = f.store.add(section("Mine")).await.unwrap().unwrap();
        f.engine.sync_with_server().await.unwrap();

        let newer = mine.updated_at.as_millis() + 10_000;
        f.remote
            .insert_remote(remote_record(&mine.id, "t1", newer, "Theirs"));
        f.meta.clear(None, None).unwrap();
        f.engine.sync_with_server().await.unwrap();
        assert_eq!(f.store.get(&mine.id).await.unwrap().data.name, "Theirs");

        let older = remote_record(&mine.id, "t1", 2, "Stale");
        f.remote.insert_remote(older);
        f.meta.clear(None, None).unwrap();
        let report = f.engine.sync_with_server().await.unwrap();
        assert_eq!(report.pull_skipped, 1);
        assert_eq!(f.store.get(&mine.id).await.unwrap().data.name, "Theirs");
    }

    #[tokio::test]
    async fn pending_delete_is_not_resurrected_by_pull() {
        let f = fixture();
        let record = f.store.add(section("Gone")).await.unwrap().unwrap();
        f.engine.sync_with_server().await.unwrap();

        f.store.remove(&record.id).await.unwrap();
        f.remote.fail_always(RemoteOp::Delete, RemoteError::Timeout);
        f.remote
            .insert_remote(remote_record(&record.id, "t1", i64::MAX / 2, "Back"));

        let report = f.engine.sync_with_server().await.unwrap();
        assert_eq!(report.delete_failures, 1);
        assert_eq!(report.pull_skipped, 1);

        let local = f
            .store
            .get_for_tenant(&TenantId::new("t1"), &record.id)
            .unwrap();
        assert_eq!(local.sync_status, SyncStatus::PendingDelete);
        assert_eq!(local.sync_error.as_deref(), Some("network timeout"));
        assert!(f.store.get(&record.id).await.is_none());
    }

    #[tokio::test]
    async fn delete_phase_removes_confirmed_rows() {
        let f = fixture();
        let a = f.store.add(section("A")).await.unwrap().unwrap();
        let b = f.store.add(section("B")).await.unwrap().unwrap();
        f.engine.sync_with_server().await.unwrap();

        f.store.remove(&a.id).await.unwrap();
        f.store.archive(&b.id).await.unwrap();
        let report = f.engine.sync_with_server().await.unwrap();

        assert_eq!(report.deleted, 2);
        assert_eq!(f.remote.calls(RemoteOp::Delete), 1);
        assert_eq!(f.remote.calls(RemoteOp::Archive), 1);
        assert!(f.store.is_empty());
        assert!(f.remote.remote_records().is_empty());
    }

    #[tokio::test]
    async fn per_record_failures_do_not_abort_the_pass() {
        let f = fixture();
        let bad = f.store.add_with_id("bad", section("Bad")).await.unwrap().unwrap();
        let good = f.store.add(section("Good")).await.unwrap().unwrap();
        f.remote
            .fail_id("bad", RemoteError::Validation("name".into()));

        let report = f.engine.sync_with_server().await.unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(report.push_failures, 1);

        let bad = f.store.get(&bad.id).await.unwrap();
        assert_eq!(bad.sync_status, SyncStatus::Failed);
        assert_eq!(bad.sync_error.as_deref(), Some("validation failed: name"));
        assert_eq!(
            f.store.get(&good.id).await.unwrap().sync_status,
            SyncStatus::Synced
        );
    }

    #[tokio::test]
    async fn delta_sync_uses_the_last_sync_time() {
        let f = fixture();
        let before = Timestamp::now();
        f.engine.sync_with_server().await.unwrap();
        let recorded = f
            .meta
            .get_last_sync(Section::KIND, &TenantId::new("t1"))
            .unwrap();
        assert!(recorded >= before);

        f.engine.sync_with_server().await.unwrap();
        assert_eq!(
            f.remote.list_options(),
            vec![ListOptions::full(), ListOptions::since(recorded)]
        );

        f.meta.clear(Some(Section::KIND), None).unwrap();
        let report = f.engine.sync_with_server().await.unwrap();
        assert_eq!(report.mode, SyncMode::Full);
        assert_eq!(f.remote.list_options()[2], ListOptions::full());
    }

    #[tokio::test]
    async fn failed_pass_keeps_the_last_sync_time() {
        let f = fixture();
        f.remote.fail_next(RemoteOp::List, RemoteError::Timeout);
        assert!(f.engine.sync_with_server().await.is_err());
        assert!(f
            .meta
            .get_last_sync(Section::KIND, &TenantId::new("t1"))
            .is_none());
        assert_eq!(f.engine.state(), SyncState::Error);
        assert_eq!(f.engine.stats().passes_failed, 1);

        // The lock was released.
        assert!(f.engine.sync_with_server().await.is_ok());
    }

    #[tokio::test]
    async fn no_tenant_aborts_before_any_remote_call() {
        let f = fixture();
        f.tenants.set(None);
        let err = f.engine.sync_with_server().await.unwrap_err();
        assert!(matches!(err, SyncError::NoTenant));
        assert_eq!(f.remote.total_calls(), 0);
    }

    #[tokio::test]
    async fn pull_ignores_other_tenants() {
        let f = fixture();
        f.remote.insert_remote(remote_record("mine", "t1", 5, "Mine"));
        f.remote.insert_remote(remote_record("theirs", "t2", 5, "Theirs"));

        let report = f.engine.sync_with_server().await.unwrap();
        assert_eq!(report.pulled, 1);
        assert!(f
            .store
            .get_for_tenant(&TenantId::new("t2"), "theirs")
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_run_one_pass() {
        let f = fixture();
        f.remote.set_latency(Duration::from_millis(50));
        f.store.add(section("A")).await.unwrap();

        let (a, b, c) = tokio::join!(
            f.engine.sync_with_server(),
            f.engine.sync_with_server(),
            f.engine.sync_with_server(),
        );
        let skipped = [a.unwrap(), b.unwrap(), c.unwrap()]
            .iter()
            .filter(|r| r.is_skipped())
            .count();
        assert_eq!(skipped, 2);
        assert_eq!(f.remote.calls(RemoteOp::List), 1);
        assert_eq!(f.remote.calls(RemoteOp::Create), 1);
        assert_eq!(f.engine.stats().passes_skipped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_calls_are_bounded() {
        let f = fixture_with(EngineConfig::default().with_max_concurrent_requests(3));
        f.remote.set_latency(Duration::from_millis(10));
        for i in 0..10 {
            f.store.add(section(&format!("S{i}"))).await.unwrap();
        }
        let report = f.engine.sync_with_server().await.unwrap();
        assert_eq!(report.pushed, 10);
        assert_eq!(f.remote.max_in_flight(), 3);
    }

    #[tokio::test]
    async fn zero_concurrency_in_a_literal_config_still_completes() {
        let f = fixture_with(EngineConfig {
            max_concurrent_requests: 0,
            ..EngineConfig::default()
        });
        let gone = f.store.add(section("Gone")).await.unwrap().unwrap();
        f.engine.sync_with_server().await.unwrap();

        f.store.remove(&gone.id).await.unwrap();
        f.store.add(section("New")).await.unwrap();
        let report = tokio::time::timeout(Duration::from_secs(5), f.engine.sync_with_server())
            .await
            .expect("pass stalled")
            .unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.pushed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn force_sync_requeues_failed_and_retries_transient_errors() {
        let f = fixture();
        let record = f.store.add_with_id("r", section("R")).await.unwrap().unwrap();
        f.remote.fail_next(RemoteOp::Create, RemoteError::Validation("x".into()));
        f.engine.sync_with_server().await.unwrap();
        assert_eq!(
            f.store.get(&record.id).await.unwrap().sync_status,
            SyncStatus::Failed
        );

        f.remote.fail_next(RemoteOp::List, RemoteError::Timeout);
        let started = Instant::now();
        let report = f.engine.force_sync().await.unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(started.elapsed(), Duration::from_secs(1));
        assert_eq!(f.engine.stats().retries, 1);
        assert_eq!(
            f.store.get(&record.id).await.unwrap().sync_status,
            SyncStatus::Synced
        );
    }

    #[tokio::test(start_paused = true)]
    async fn force_sync_does_not_retry_auth_failures() {
        let f = fixture();
        f.remote
            .fail_always(RemoteOp::List, RemoteError::Unauthorized("expired".into()));
        let started = Instant::now();
        let err = f.engine.force_sync().await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(RemoteError::Unauthorized(_))));
        assert_eq!(f.remote.calls(RemoteOp::List), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    struct Bespoke;

    #[async_trait]
    impl crate::remote::CustomSync<Section> for Bespoke {
        async fn sync_with_server(
            &self,
            store: &LocalStore<Section>,
            tenant_id: &TenantId,
        ) -> SyncResult<SyncReport> {
            let mut report = SyncReport::new(SyncMode::Full);
            report.pushed = store
                .records_with_status(tenant_id, &SyncStatus::PUSHABLE)
                .len();
            Ok(report)
        }
    }

    struct BespokeRemote {
        inner: MockRemote<Section>,
        custom: Bespoke,
    }

    #[async_trait]
    impl RemoteAdapter<Section> for BespokeRemote {
        async fn list(&self, options: ListOptions) -> RemoteResult<Vec<Record<Section>>> {
            self.inner.list(options).await
        }
        async fn create(&self, record: &Record<Section>) -> RemoteResult<Record<Section>> {
            self.inner.create(record).await
        }
        async fn update(&self, record: &Record<Section>) -> RemoteResult<Record<Section>> {
            self.inner.update(record).await
        }
        async fn delete(&self, id: &str) -> RemoteResult<()> {
            self.inner.delete(id).await
        }
        fn custom_sync(&self) -> Option<&dyn crate::remote::CustomSync<Section>> {
            Some(&self.custom)
        }
    }

    #[tokio::test]
    async fn bespoke_sync_replaces_the_phases() {
        let f = fixture();
        f.store.add(section("A")).await.unwrap();
        let remote = Arc::new(BespokeRemote {
            inner: MockRemote::new(),
            custom: Bespoke,
        });
        let engine = EntitySyncEngine::new(
            f.store.clone(),
            remote.clone() as Arc<dyn RemoteAdapter<Section>>,
            f.meta.clone(),
            EngineConfig::default(),
        );

        let report = engine.sync_with_server().await.unwrap();
        assert_eq!(report.mode, SyncMode::Bespoke);
        assert_eq!(report.pushed, 1);
        assert_eq!(remote.inner.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_sync_debounces_local_mutations() {
        let f = fixture();
        let _auto = f.engine.spawn_auto_sync();

        for i in 0..5 {
            f.store.add(section(&format!("S{i}"))).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(f.remote.calls(RemoteOp::List), 1);
        assert_eq!(f.remote.calls(RemoteOp::Create), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_sync_waits_while_offline() {
        let f = fixture();
        let _auto = f.engine.spawn_auto_sync();
        f.store.connectivity().set_online(false);

        f.store.add(section("A")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(f.remote.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn first_query_of_an_empty_tenant_triggers_initial_sync() {
        let f = fixture();
        f.remote.insert_remote(remote_record("a", "t1", 5, "From server"));
        let _auto = f.engine.spawn_auto_sync();

        let mut list = f.store.watch_list();
        let snapshot = list
            .wait_for(|s| s.hydrated && !s.value.is_empty())
            .await
            .unwrap();
        assert_eq!(snapshot.value[0].data.name, "From server");
        assert_eq!(f.remote.calls(RemoteOp::List), 1);
    }
}
