//! Remote adapter abstraction.
//!
//! A [`RemoteAdapter`] is the only contract between the engine and the
//! server. It speaks whole records; how they travel over the network is the
//! adapter's business.

use crate::engine::SyncReport;
use crate::error::{RemoteResult, SyncResult};
use async_trait::async_trait;
use fieldsync_core::{Entity, LocalStore, Record, TenantId, Timestamp};

/// Options for [`RemoteAdapter::list`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Only return records updated after this time. `None` lists everything.
    pub since: Option<Timestamp>,
}

impl ListOptions {
    /// Lists every record.
    pub fn full() -> Self {
        Self { since: None }
    }

    /// Lists records updated after `since`.
    pub fn since(since: Timestamp) -> Self {
        Self { since: Some(since) }
    }
}

/// Server-side operations for one entity type.
///
/// Implementations must return records with the server's canonical fields
/// (in particular `updated_at`), which the engine stores as `Synced`.
#[async_trait]
pub trait RemoteAdapter<T: Entity>: Send + Sync {
    /// Lists remote records visible to the caller.
    async fn list(&self, options: ListOptions) -> RemoteResult<Vec<Record<T>>>;

    /// Creates a record remotely.
    async fn create(&self, record: &Record<T>) -> RemoteResult<Record<T>>;

    /// Updates an existing remote record.
    async fn update(&self, record: &Record<T>) -> RemoteResult<Record<T>>;

    /// Deletes a remote record.
    async fn delete(&self, id: &str) -> RemoteResult<()>;

    /// Applies the remote side-effect of archiving. Defaults to deletion.
    async fn archive(&self, id: &str) -> RemoteResult<()> {
        self.delete(id).await
    }

    /// Returns a bespoke reconciliation that replaces the delete, pull and
    /// push phases for this entity type.
    fn custom_sync(&self) -> Option<&dyn CustomSync<T>> {
        None
    }
}

/// Bespoke reconciliation for entity types the default algorithm does not fit.
///
/// Runs under the engine's per-store lock, after tenant resolution.
#[async_trait]
pub trait CustomSync<T: Entity>: Send + Sync {
    /// Reconciles `store` for `tenant_id`.
    async fn sync_with_server(
        &self,
        store: &LocalStore<T>,
        tenant_id: &TenantId,
    ) -> SyncResult<SyncReport>;
}
