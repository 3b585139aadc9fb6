//! Record model shared by every entity type.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of a tenant, the isolation boundary for every record and query.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a tenant id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TenantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Self(millis)
    }

    /// Creates a timestamp from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns milliseconds since the epoch.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Returns a fresh timestamp strictly greater than `previous`.
    ///
    /// Two mutations inside the same millisecond, or a clock that stepped
    /// backwards, still produce an increasing `updated_at`. Saturates at
    /// `i64::MAX`.
    #[must_use]
    pub fn next_after(previous: Timestamp) -> Self {
        Self(Self::now().0.max(previous.0.saturating_add(1)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Synchronization state of a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Local-only, not scheduled for upload.
    Draft,
    /// Waiting to be pushed.
    Queued,
    /// Matches the server-confirmed version.
    Synced,
    /// Last push failed; retried on the next pass.
    Failed,
    /// Deleted locally, waiting for remote deletion.
    PendingDelete,
    /// Terminal; removed locally once the remote archive side-effect succeeds.
    Archived,
}

impl SyncStatus {
    /// All statuses, in declaration order.
    pub const ALL: [SyncStatus; 6] = [
        SyncStatus::Draft,
        SyncStatus::Queued,
        SyncStatus::Synced,
        SyncStatus::Failed,
        SyncStatus::PendingDelete,
        SyncStatus::Archived,
    ];

    /// Statuses the push phase uploads.
    pub const PUSHABLE: [SyncStatus; 2] = [SyncStatus::Queued, SyncStatus::Failed];

    /// Returns true if normal read queries return records in this status.
    #[must_use]
    pub const fn is_visible(self) -> bool {
        !matches!(self, SyncStatus::PendingDelete)
    }

    /// Returns true if local mutations are still accepted.
    #[must_use]
    pub const fn is_mutable(self) -> bool {
        !matches!(self, SyncStatus::PendingDelete | SyncStatus::Archived)
    }
}

/// A domain type stored in a [`crate::LocalStore`].
///
/// `KIND` names the journal file and the sync side-table key, so it must be
/// stable across releases.
pub trait Entity:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Stable name of the entity type.
    const KIND: &'static str;
}

/// A stored record: entity fields plus tenant and sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
    /// Record id, unique within a tenant.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last mutation time; the only conflict-resolution signal.
    pub updated_at: Timestamp,
    /// Synchronization state.
    pub sync_status: SyncStatus,
    /// Message of the last failed remote call, if any.
    pub sync_error: Option<String>,
    /// Entity fields.
    pub data: T,
}

impl<T> Record<T> {
    /// Returns the logical primary key.
    #[must_use]
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.tenant_id.clone(), self.id.clone())
    }

    /// Returns true if the record has been edited since it was created.
    #[must_use]
    pub fn was_edited(&self) -> bool {
        self.created_at != self.updated_at
    }

    /// Sets the status and attaches or clears the error message.
    pub fn mark(&mut self, status: SyncStatus, error: Option<String>) {
        self.sync_status = status;
        self.sync_error = error;
    }
}

/// `(tenant_id, id)`, the logical primary key of a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Record id.
    pub id: String,
}

impl RecordKey {
    /// Creates a key.
    pub fn new(tenant_id: TenantId, id: impl Into<String>) -> Self {
        Self {
            tenant_id,
            id: id.into(),
        }
    }
}

/// Returns true if a pulled remote version should replace the local one.
///
/// Last writer wins: the remote version is taken only when it is strictly
/// newer, and never over a record that is waiting for remote deletion.
#[must_use]
pub fn remote_wins<T>(local: &Record<T>, remote_updated_at: Timestamp) -> bool {
    local.sync_status != SyncStatus::PendingDelete && remote_updated_at > local.updated_at
}

/// Per-status record counts for one tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    /// Records in [`SyncStatus::Draft`].
    pub draft: usize,
    /// Records in [`SyncStatus::Queued`].
    pub queued: usize,
    /// Records in [`SyncStatus::Synced`].
    pub synced: usize,
    /// Records in [`SyncStatus::Failed`].
    pub failed: usize,
    /// Records in [`SyncStatus::PendingDelete`].
    pub pending_delete: usize,
    /// Records in [`SyncStatus::Archived`].
    pub archived: usize,
}

impl StatusCounts {
    /// Adds `n` records in `status`.
    pub fn add(&mut self, status: SyncStatus, n: usize) {
        let slot = match status {
            SyncStatus::Draft => &mut self.draft,
            SyncStatus::Queued => &mut self.queued,
            SyncStatus::Synced => &mut self.synced,
            SyncStatus::Failed => &mut self.failed,
            SyncStatus::PendingDelete => &mut self.pending_delete,
            SyncStatus::Archived => &mut self.archived,
        };
        *slot += n;
    }

    /// Records with local changes the server has not confirmed.
    #[must_use]
    pub fn unsynced(&self) -> usize {
        self.queued + self.failed + self.pending_delete + self.archived
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(updated_at: i64, status: SyncStatus) -> Record<u32> {
        Record {
            id: "r".into(),
            tenant_id: TenantId::new("t1"),
            created_at: Timestamp::from_millis(1),
            updated_at: Timestamp::from_millis(updated_at),
            sync_status: status,
            sync_error: None,
            data: 0,
        }
    }

    #[test]
    fn next_after_is_strictly_increasing() {
        let far_future = Timestamp::from_millis(i64::MAX / 2);
        assert_eq!(
            Timestamp::next_after(far_future),
            Timestamp::from_millis(i64::MAX / 2 + 1)
        );
        let past = Timestamp::from_millis(5);
        assert!(Timestamp::next_after(past) > past);
    }

    #[test]
    fn next_after_saturates_at_the_ceiling() {
        let ceiling = Timestamp::from_millis(i64::MAX);
        assert_eq!(Timestamp::next_after(ceiling), ceiling);
    }

    #[test]
    fn visibility_and_mutability() {
        assert!(!SyncStatus::PendingDelete.is_visible());
        assert!(SyncStatus::Archived.is_visible());
        assert!(!SyncStatus::Archived.is_mutable());
        assert!(SyncStatus::Failed.is_mutable());
    }

    #[test]
    fn pending_delete_is_never_overwritten() {
        let local = record(10, SyncStatus::PendingDelete);
        assert!(!remote_wins(&local, Timestamp::from_millis(1_000)));
    }

    #[test]
    fn counts_unsynced() {
        let mut counts = StatusCounts::default();
        for status in SyncStatus::ALL {
            counts.add(status, 1);
        }
        assert_eq!(counts.unsynced(), 4);
        assert_eq!(counts.synced, 1);
    }

    proptest! {
        #[test]
        fn last_writer_wins(local_at in 0i64..10_000, remote_at in 0i64..10_000) {
            let local = record(local_at, SyncStatus::Synced);
            prop_assert_eq!(remote_wins(&local, Timestamp::from_millis(remote_at)), remote_at > local_at);
        }
    }
}
