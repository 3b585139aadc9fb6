//! Indexed in-memory table of records.
//!
//! The table is the materialized state of a journal. Rows are keyed by
//! `(tenant_id, id)` and indexed by tenant, by `(tenant, status)` and by
//! `(tenant, updated_at)`. Every read path goes through a tenant, so a
//! query can only ever see one tenant's rows.

use crate::types::{Record, RecordKey, StatusCounts, SyncStatus, TenantId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A single journaled mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableOp<T> {
    /// Insert or replace a record.
    Put(Record<T>),
    /// Physically remove a record.
    Delete {
        /// Owning tenant.
        tenant_id: TenantId,
        /// Record id.
        id: String,
    },
    /// Physically remove every record of a tenant.
    ClearTenant {
        /// Tenant to clear.
        tenant_id: TenantId,
    },
}

/// Rows plus secondary indexes.
#[derive(Debug, Clone)]
pub struct Table<T> {
    rows: HashMap<RecordKey, Record<T>>,
    by_tenant: BTreeMap<TenantId, BTreeSet<String>>,
    by_status: BTreeMap<(TenantId, SyncStatus), BTreeSet<String>>,
    by_updated: BTreeSet<(TenantId, Timestamp, String)>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
            by_tenant: BTreeMap::new(),
            by_status: BTreeMap::new(),
            by_updated: BTreeSet::new(),
        }
    }
}

impl<T: Clone> Table<T> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from a snapshot.
    pub fn from_records(records: impl IntoIterator<Item = Record<T>>) -> Self {
        let mut table = Self::new();
        for record in records {
            table.put(record);
        }
        table
    }

    /// Looks up a record, whatever its status.
    pub fn get(&self, tenant_id: &TenantId, id: &str) -> Option<&Record<T>> {
        self.rows.get(&RecordKey::new(tenant_id.clone(), id))
    }

    /// Inserts or replaces a record, keeping indexes in step.
    pub fn put(&mut self, record: Record<T>) {
        let key = record.key();
        if let Some(old) = self.rows.remove(&key) {
            self.unindex(&old);
        }
        self.by_tenant
            .entry(record.tenant_id.clone())
            .or_default()
            .insert(record.id.clone());
        self.by_status
            .entry((record.tenant_id.clone(), record.sync_status))
            .or_default()
            .insert(record.id.clone());
        self.by_updated.insert((
            record.tenant_id.clone(),
            record.updated_at,
            record.id.clone(),
        ));
        self.rows.insert(key, record);
    }

    /// Removes a record.
    pub fn delete(&mut self, tenant_id: &TenantId, id: &str) -> Option<Record<T>> {
        let record = self.rows.remove(&RecordKey::new(tenant_id.clone(), id))?;
        self.unindex(&record);
        Some(record)
    }

    /// Removes every record of a tenant and returns their ids.
    pub fn clear_tenant(&mut self, tenant_id: &TenantId) -> Vec<String> {
        let ids: Vec<String> = self
            .by_tenant
            .get(tenant_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        for id in &ids {
            self.delete(tenant_id, id);
        }
        ids
    }

    /// Applies a journaled operation.
    pub fn apply(&mut self, op: TableOp<T>) {
        match op {
            TableOp::Put(record) => self.put(record),
            TableOp::Delete { tenant_id, id } => {
                self.delete(&tenant_id, &id);
            }
            TableOp::ClearTenant { tenant_id } => {
                self.clear_tenant(&tenant_id);
            }
        }
    }

    /// Records of a tenant in any of `statuses`.
    pub fn with_status(&self, tenant_id: &TenantId, statuses: &[SyncStatus]) -> Vec<Record<T>> {
        let mut out = Vec::new();
        for status in statuses {
            if let Some(ids) = self.by_status.get(&(tenant_id.clone(), *status)) {
                out.extend(ids.iter().filter_map(|id| self.get(tenant_id, id).cloned()));
            }
        }
        out
    }

    /// Visible records of a tenant, newest `updated_at` first.
    pub fn visible(&self, tenant_id: &TenantId) -> Vec<Record<T>> {
        let start = (tenant_id.clone(), Timestamp::from_millis(i64::MIN), String::new());
        let mut records: Vec<Record<T>> = self
            .by_updated
            .range(start..)
            .take_while(|(tenant, _, _)| tenant == tenant_id)
            .filter_map(|(_, _, id)| self.get(tenant_id, id))
            .filter(|record| record.sync_status.is_visible())
            .cloned()
            .collect();
        records.reverse();
        records
    }

    /// Number of rows a tenant owns, including soft-deleted ones.
    pub fn tenant_len(&self, tenant_id: &TenantId) -> usize {
        self.by_tenant.get(tenant_id).map_or(0, BTreeSet::len)
    }

    /// Per-status counts for a tenant.
    pub fn status_counts(&self, tenant_id: &TenantId) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for status in SyncStatus::ALL {
            let n = self
                .by_status
                .get(&(tenant_id.clone(), status))
                .map_or(0, BTreeSet::len);
            counts.add(status, n);
        }
        counts
    }

    /// Tenants that own at least one row.
    pub fn tenants(&self) -> Vec<TenantId> {
        self.by_tenant.keys().cloned().collect()
    }

    /// All rows, in no particular order.
    pub fn records(&self) -> Vec<Record<T>> {
        self.rows.values().cloned().collect()
    }

    /// Total number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn unindex(&mut self, record: &Record<T>) {
        if let Some(ids) = self.by_tenant.get_mut(&record.tenant_id) {
            ids.remove(&record.id);
            if ids.is_empty() {
                self.by_tenant.remove(&record.tenant_id);
            }
        }
        let status_key = (record.tenant_id.clone(), record.sync_status);
        if let Some(ids) = self.by_status.get_mut(&status_key) {
            ids.remove(&record.id);
            if ids.is_empty() {
                self.by_status.remove(&status_key);
            }
        }
        self.by_updated.remove(&(
            record.tenant_id.clone(),
            record.updated_at,
            record.id.clone(),
        ));
    }
}

/// Staged writes against a table, committed as one journal frame.
///
/// Reads through the transaction see its own staged writes.
pub struct Transaction<'a, T> {
    table: &'a Table<T>,
    staged: HashMap<RecordKey, Option<Record<T>>>,
    cleared: BTreeSet<TenantId>,
    ops: Vec<TableOp<T>>,
}

impl<'a, T: Clone> Transaction<'a, T> {
    pub(crate) fn new(table: &'a Table<T>) -> Self {
        Self {
            table,
            staged: HashMap::new(),
            cleared: BTreeSet::new(),
            ops: Vec::new(),
        }
    }

    /// Reads a record as this transaction currently sees it.
    pub fn get(&self, tenant_id: &TenantId, id: &str) -> Option<Record<T>> {
        let key = RecordKey::new(tenant_id.clone(), id);
        if let Some(staged) = self.staged.get(&key) {
            return staged.clone();
        }
        if self.cleared.contains(tenant_id) {
            return None;
        }
        self.table.get(tenant_id, id).cloned()
    }

    /// Stages an insert or replace.
    pub fn put(&mut self, record: Record<T>) {
        self.staged.insert(record.key(), Some(record.clone()));
        self.ops.push(TableOp::Put(record));
    }

    /// Stages a physical removal.
    pub fn delete(&mut self, tenant_id: &TenantId, id: &str) {
        self.staged
            .insert(RecordKey::new(tenant_id.clone(), id), None);
        self.ops.push(TableOp::Delete {
            tenant_id: tenant_id.clone(),
            id: id.to_string(),
        });
    }

    /// Stages removal of every record of a tenant.
    pub fn clear_tenant(&mut self, tenant_id: &TenantId) {
        self.staged.retain(|key, _| &key.tenant_id != tenant_id);
        self.cleared.insert(tenant_id.clone());
        self.ops.push(TableOp::ClearTenant {
            tenant_id: tenant_id.clone(),
        });
    }

    /// Returns true if nothing was staged.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn into_ops(self) -> Vec<TableOp<T>> {
        self.ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rec(tenant: &str, id: &str, updated: i64, status: SyncStatus) -> Record<String> {
        Record {
            id: id.into(),
            tenant_id: TenantId::new(tenant),
            created_at: Timestamp::from_millis(0),
            updated_at: Timestamp::from_millis(updated),
            sync_status: status,
            sync_error: None,
            data: format!("{tenant}/{id}"),
        }
    }

    #[test]
    fn put_replaces_and_reindexes() {
        let mut table = Table::new();
        let t1 = TenantId::new("t1");
        table.put(rec("t1", "a", 1, SyncStatus::Queued));
        table.put(rec("t1", "a", 2, SyncStatus::Synced));

        assert_eq!(table.len(), 1);
        assert!(table.with_status(&t1, &[SyncStatus::Queued]).is_empty());
        assert_eq!(table.with_status(&t1, &[SyncStatus::Synced]).len(), 1);
        assert_eq!(table.visible(&t1)[0].updated_at, Timestamp::from_millis(2));
    }

    #[test]
    fn visible_excludes_pending_delete_and_orders_newest_first() {
        let mut table = Table::new();
        let t1 = TenantId::new("t1");
        table.put(rec("t1", "old", 1, SyncStatus::Synced));
        table.put(rec("t1", "new", 9, SyncStatus::Queued));
        table.put(rec("t1", "gone", 5, SyncStatus::PendingDelete));

        let ids: Vec<String> = table.visible(&t1).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(table.tenant_len(&t1), 3);
    }

    #[test]
    fn clear_tenant_leaves_other_tenants() {
        let mut table = Table::new();
        table.put(rec("t1", "a", 1, SyncStatus::Synced));
        table.put(rec("t2", "a", 1, SyncStatus::Synced));

        let cleared = table.clear_tenant(&TenantId::new("t1"));
        assert_eq!(cleared, vec!["a"]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.tenants(), vec![TenantId::new("t2")]);
    }

    #[test]
    fn status_counts_per_tenant() {
        let mut table = Table::new();
        table.put(rec("t1", "a", 1, SyncStatus::Failed));
        table.put(rec("t1", "b", 1, SyncStatus::Failed));
        table.put(rec("t2", "c", 1, SyncStatus::Failed));

        let counts = table.status_counts(&TenantId::new("t1"));
        assert_eq!(counts.failed, 2);
        assert_eq!(counts.unsynced(), 2);
    }

    #[test]
    fn transaction_reads_its_own_writes() {
        let mut table = Table::new();
        let t1 = TenantId::new("t1");
        table.put(rec("t1", "a", 1, SyncStatus::Synced));

        let mut txn = Transaction::new(&table);
        txn.delete(&t1, "a");
        assert!(txn.get(&t1, "a").is_none());
        txn.put(rec("t1", "b", 2, SyncStatus::Queued));
        assert!(txn.get(&t1, "b").is_some());
        let ops = txn.into_ops();
        assert_eq!(ops.len(), 2);

        for op in ops {
            table.apply(op);
        }
        assert!(table.get(&t1, "a").is_none());
        assert!(table.get(&t1, "b").is_some());
    }

    #[test]
    fn transaction_clear_hides_committed_rows() {
        let mut table = Table::new();
        let t1 = TenantId::new("t1");
        table.put(rec("t1", "a", 1, SyncStatus::Synced));

        let mut txn = Transaction::new(&table);
        txn.clear_tenant(&t1);
        assert!(txn.get(&t1, "a").is_none());
        txn.put(rec("t1", "z", 3, SyncStatus::Queued));
        assert!(txn.get(&t1, "z").is_some());
    }

    proptest! {
        #[test]
        fn queries_never_cross_tenants(
            rows in prop::collection::vec((0usize..3, "[a-e]", 0i64..50), 0..40)
        ) {
            let tenants = ["t0", "t1", "t2"];
            let mut table = Table::new();
            for (t, id, updated) in &rows {
                table.put(rec(tenants[*t], id, *updated, SyncStatus::Synced));
            }
            for tenant in tenants {
                let tenant = TenantId::new(tenant);
                for record in table.visible(&tenant) {
                    prop_assert_eq!(&record.tenant_id, &tenant);
                }
                for record in table.with_status(&tenant, &SyncStatus::ALL) {
                    prop_assert_eq!(&record.tenant_id, &tenant);
                }
            }
        }
    }
}
