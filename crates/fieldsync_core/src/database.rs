//! Database facade: one directory, one journal per entity type.

use crate::config::StoreConfig;
use crate::connectivity::Connectivity;
use crate::dir::{DatabaseDir, META_KIND};
use crate::error::{CoreError, CoreResult};
use crate::journal::{encode_cbor, FrameType, Journal};
use crate::meta::SyncMetaStore;
use crate::store::{replay_table, LocalStore};
use crate::tenant::{TenantCache, TenantResolver};
use crate::types::{Entity, StatusCounts, TenantId};
use fieldsync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Summary of one entity journal, as shown by tooling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JournalSummary {
    /// Entity kind.
    pub kind: String,
    /// Frames in the journal.
    pub frames: usize,
    /// Journal size in bytes.
    pub bytes: u64,
    /// Total rows, including soft-deleted ones.
    pub records: usize,
    /// Per-tenant status counts.
    pub tenants: BTreeMap<TenantId, StatusCounts>,
}

/// Type-erased maintenance operations over an open store.
trait StoreMaintenance: Send + Sync {
    fn compact(&self) -> CoreResult<()>;
    fn refresh_queries(&self);
    fn summary(&self) -> CoreResult<JournalSummary>;
}

impl<T: Entity> StoreMaintenance for LocalStore<T> {
    fn compact(&self) -> CoreResult<()> {
        LocalStore::compact(self)
    }

    fn refresh_queries(&self) {
        LocalStore::refresh_queries(self);
    }

    fn summary(&self) -> CoreResult<JournalSummary> {
        let tenants = self
            .tenants()
            .into_iter()
            .map(|t| {
                let counts = self.status_counts_for(&t);
                (t, counts)
            })
            .collect();
        Ok(JournalSummary {
            kind: T::KIND.to_string(),
            frames: self.frame_count(),
            bytes: self.journal_size()?,
            records: self.len(),
            tenants,
        })
    }
}

struct StoreSlot {
    typed: Box<dyn Any + Send + Sync>,
    maintenance: Arc<dyn StoreMaintenance>,
}

/// The local database: opens one [`LocalStore`] per entity type plus the
/// [`SyncMetaStore`] side-table, all sharing a tenant resolver and a
/// connectivity signal.
///
/// ```rust,ignore
/// let tenants = Arc::new(TenantCache::new(account_service, TenantCacheConfig::default()));
/// let db = Database::open(Path::new("fieldsync.db"), StoreConfig::default(), tenants.clone(), Connectivity::new(true))?;
/// db.follow_tenant_cache(&tenants);
/// let sections = db.store::<Section>()?;
/// sections.add(Section { name: "Roof".into(), ..Default::default() }).await?;
/// ```
pub struct Database {
    dir: Option<DatabaseDir>,
    config: StoreConfig,
    tenants: Arc<dyn TenantResolver>,
    connectivity: Connectivity,
    meta: Arc<SyncMetaStore>,
    stores: Arc<Mutex<HashMap<&'static str, StoreSlot>>>,
}

impl Database {
    /// Opens or creates a database directory.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseLocked`] if another process has the
    /// directory open, or an I/O or journal error.
    pub fn open(
        path: &Path,
        config: StoreConfig,
        tenants: Arc<dyn TenantResolver>,
        connectivity: Connectivity,
    ) -> CoreResult<Self> {
        let dir = DatabaseDir::open(path, true)?;
        let meta = SyncMetaStore::open(
            Box::new(FileBackend::open(&dir.meta_path())?),
            config.sync_on_commit,
        )?;
        info!(path = %path.display(), "database opened");
        Ok(Self::with_parts(Some(dir), config, tenants, connectivity, meta))
    }

    /// Opens a database that lives only in memory.
    pub fn open_in_memory(
        config: StoreConfig,
        tenants: Arc<dyn TenantResolver>,
        connectivity: Connectivity,
    ) -> CoreResult<Self> {
        let meta = SyncMetaStore::open(Box::new(InMemoryBackend::new()), false)?;
        Ok(Self::with_parts(None, config, tenants, connectivity, meta))
    }

    fn with_parts(
        dir: Option<DatabaseDir>,
        config: StoreConfig,
        tenants: Arc<dyn TenantResolver>,
        connectivity: Connectivity,
        meta: SyncMetaStore,
    ) -> Self {
        Self {
            dir,
            config,
            tenants,
            connectivity,
            meta: Arc::new(meta),
            stores: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the store for `T`, opening it on first use.
    ///
    /// # Errors
    ///
    /// Fails if the journal cannot be replayed, if `T::KIND` is reserved, or
    /// if another type already registered the same kind.
    pub fn store<T: Entity>(&self) -> CoreResult<LocalStore<T>> {
        let mut stores = self.stores.lock();
        if let Some(slot) = stores.get(T::KIND) {
            return slot
                .typed
                .downcast_ref::<LocalStore<T>>()
                .cloned()
                .ok_or_else(|| {
                    CoreError::invalid_operation(format!(
                        "entity kind {} is registered by another type",
                        T::KIND
                    ))
                });
        }
        if T::KIND == META_KIND {
            return Err(CoreError::invalid_operation(format!(
                "entity kind {META_KIND} is reserved"
            )));
        }

        let store = LocalStore::<T>::open(
            self.backend_for(T::KIND)?,
            self.config.clone(),
            self.tenants.clone(),
            self.connectivity.clone(),
        )?;
        stores.insert(
            T::KIND,
            StoreSlot {
                typed: Box::new(store.clone()),
                maintenance: Arc::new(store.clone()),
            },
        );
        Ok(store)
    }

    /// The last-sync side-table.
    pub fn meta(&self) -> Arc<SyncMetaStore> {
        self.meta.clone()
    }

    /// The shared tenant resolver.
    pub fn tenants(&self) -> Arc<dyn TenantResolver> {
        self.tenants.clone()
    }

    /// The shared connectivity signal.
    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Directory path, or `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(DatabaseDir::path)
    }

    /// Re-runs every live query of every open store. Call after the user
    /// switches tenants, or let [`follow_tenant_cache`](Self::follow_tenant_cache)
    /// do it.
    pub fn refresh_queries(&self) {
        refresh_all(&self.stores);
    }

    /// Refreshes every live query whenever `cache` is invalidated, so a
    /// [`TenantCache::set_preferred_tenant`] moves open queries to the new
    /// tenant.
    pub fn follow_tenant_cache(&self, cache: &TenantCache) {
        let stores = Arc::downgrade(&self.stores);
        cache.on_invalidate(move || {
            if let Some(stores) = stores.upgrade() {
                refresh_all(&stores);
            }
        });
    }

    /// Summaries of every entity journal, open or not, sorted by kind.
    pub fn inspect(&self) -> CoreResult<Vec<JournalSummary>> {
        let open = self.open_stores();
        let mut summaries = Vec::new();
        for kind in self.all_kinds(&open)? {
            let summary = match open.get(kind.as_str()) {
                Some(store) => store.summary()?,
                None => self.summarize_closed(&kind)?,
            };
            summaries.push(summary);
        }
        Ok(summaries)
    }

    /// Compacts every entity journal and the side-table. Returns the number
    /// of journals rewritten.
    pub fn compact_all(&self) -> CoreResult<usize> {
        let open = self.open_stores();
        let kinds = self.all_kinds(&open)?;
        for kind in &kinds {
            match open.get(kind.as_str()) {
                Some(store) => store.compact()?,
                None => self.compact_closed(kind)?,
            }
        }
        self.meta.compact()?;
        info!(journals = kinds.len() + 1, "database compacted");
        Ok(kinds.len() + 1)
    }

    fn backend_for(&self, kind: &str) -> CoreResult<Box<dyn StorageBackend>> {
        Ok(match &self.dir {
            Some(dir) => Box::new(FileBackend::open(&dir.journal_path(kind))?),
            None => Box::new(InMemoryBackend::new()),
        })
    }

    fn open_stores(&self) -> HashMap<String, Arc<dyn StoreMaintenance>> {
        self.stores
            .lock()
            .iter()
            .map(|(kind, slot)| ((*kind).to_string(), slot.maintenance.clone()))
            .collect()
    }

    fn all_kinds(&self, open: &HashMap<String, Arc<dyn StoreMaintenance>>) -> CoreResult<BTreeSet<String>> {
        let mut kinds: BTreeSet<String> = open.keys().cloned().collect();
        if let Some(dir) = &self.dir {
            kinds.extend(dir.journal_kinds()?);
        }
        Ok(kinds)
    }

    /// Journal of a kind no store has open, decoded without its entity type.
    fn closed_journal(&self, kind: &str) -> CoreResult<Journal> {
        let backend = self.backend_for(kind)?;
        Ok(Journal::new(backend, self.config.sync_on_commit))
    }

    fn summarize_closed(&self, kind: &str) -> CoreResult<JournalSummary> {
        let journal = self.closed_journal(kind)?;
        let table = replay_table::<ciborium::Value>(&journal)?;
        let tenants = table
            .tenants()
            .into_iter()
            .map(|t| {
                let counts = table.status_counts(&t);
                (t, counts)
            })
            .collect();
        Ok(JournalSummary {
            kind: kind.to_string(),
            frames: journal.frame_count(),
            bytes: journal.size()?,
            records: table.len(),
            tenants,
        })
    }

    fn compact_closed(&self, kind: &str) -> CoreResult<()> {
        let journal = self.closed_journal(kind)?;
        let table = replay_table::<ciborium::Value>(&journal)?;
        journal.rewrite(FrameType::Snapshot, &encode_cbor(&table.records())?)
    }
}

fn refresh_all(stores: &Mutex<HashMap<&'static str, StoreSlot>>) {
    let slots: Vec<_> = stores
        .lock()
        .values()
        .map(|slot| slot.maintenance.clone())
        .collect();
    for store in slots {
        store.refresh_queries();
    }
}
