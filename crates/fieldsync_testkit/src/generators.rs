//! Property-based test generators using proptest.
//!
//! Provides strategies for generating tenants, records and sequences of
//! store operations.

use crate::builders::RecordBuilder;
use fieldsync_core::{Record, Section, SyncStatus};
use proptest::prelude::*;

/// Small tenant pool, so generated operations collide across tenants.
pub const TENANTS: [&str; 3] = ["tenant-a", "tenant-b", "tenant-c"];

/// Strategy for a tenant name from [`TENANTS`].
pub fn tenant_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(TENANTS.to_vec())
}

/// Strategy for record ids. The pool is small so ids repeat across tenants.
pub fn record_id_strategy() -> impl Strategy<Value = String> {
    (0u8..8).prop_map(|n| format!("rec-{n}"))
}

/// Strategy for timestamps in milliseconds.
pub fn timestamp_strategy() -> impl Strategy<Value = i64> {
    1i64..1_000_000
}

/// Strategy for section contents.
pub fn section_strategy() -> impl Strategy<Value = Section> {
    ("[A-Z][a-z]{0,11}", 0u32..20, any::<bool>()).prop_map(|(name, order, collapsed)| Section {
        name,
        order,
        collapsed,
    })
}

/// Strategy for a remote section record of one of [`TENANTS`].
pub fn remote_section_strategy() -> impl Strategy<Value = Record<Section>> {
    (
        record_id_strategy(),
        tenant_strategy(),
        section_strategy(),
        timestamp_strategy(),
    )
        .prop_map(|(id, tenant, data, updated_at)| {
            RecordBuilder::new(id, data)
                .tenant(tenant)
                .updated_at(updated_at)
                .build()
        })
}

/// A user-facing operation on a section store.
#[derive(Debug, Clone)]
pub enum StoreOp {
    /// Switch the current tenant.
    SwitchTenant(&'static str),
    /// Add a section with an id.
    Add {
        /// Record id.
        id: String,
        /// Section name.
        name: String,
    },
    /// Rename a section.
    Rename {
        /// Record id.
        id: String,
        /// New name.
        name: String,
    },
    /// Remove a section.
    Remove {
        /// Record id.
        id: String,
    },
    /// Archive a section.
    Archive {
        /// Record id.
        id: String,
    },
}

/// Strategy for a single store operation.
pub fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        tenant_strategy().prop_map(StoreOp::SwitchTenant),
        (record_id_strategy(), "[a-z]{1,8}").prop_map(|(id, name)| StoreOp::Add { id, name }),
        (record_id_strategy(), "[a-z]{1,8}").prop_map(|(id, name)| StoreOp::Rename { id, name }),
        record_id_strategy().prop_map(|id| StoreOp::Remove { id }),
        record_id_strategy().prop_map(|id| StoreOp::Archive { id }),
    ]
}

/// Strategy for a sequence of store operations.
pub fn store_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<StoreOp>> {
    prop::collection::vec(store_op_strategy(), 1..max_len)
}

/// Strategy for the status of a local record.
pub fn status_strategy() -> impl Strategy<Value = SyncStatus> {
    prop::sample::select(SyncStatus::ALL.to_vec())
}
