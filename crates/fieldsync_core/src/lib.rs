//! # fieldsync core
//!
//! Tenant-scoped local replicas of the survey application's entity types.
//!
//! This crate provides:
//! - [`LocalStore`], a journaled and indexed table per entity type
//! - Live queries with a hydration flag
//! - The [`SyncMetaStore`] side-table of last-sync times
//! - Tenant resolution with a TTL cache
//! - The [`Database`] directory handle that ties them together
//!
//! ## Key Invariants
//!
//! - Every read is scoped to exactly one tenant
//! - `(tenant_id, id)` is the primary key of a record
//! - Records pending deletion are invisible to reads but kept until the
//!   server confirms the deletion
//! - Every mutation refreshes `updated_at`, the only conflict signal
//! - A transaction is one journal frame: applied completely or not at all

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_feed;
mod config;
mod connectivity;
mod database;
mod dir;
mod entities;
mod error;
mod journal;
mod live;
mod meta;
mod store;
mod table;
mod tenant;
#[cfg(test)]
mod testing;
mod types;

pub use change_feed::{ChangeEvent, ChangeFeed, Origin, StoreSignal, SyncRequest};
pub use config::{StoreConfig, TenantCacheConfig};
pub use connectivity::Connectivity;
pub use database::{Database, JournalSummary};
pub use dir::{DatabaseDir, META_KIND};
pub use entities::{
    Component, ConditionPhrase, Element, ImageMetadata, Section, Survey, SurveyState,
};
pub use error::{CoreError, CoreResult};
pub use journal::{FrameType, JOURNAL_MAGIC, JOURNAL_VERSION};
pub use live::{LiveQuery, QuerySnapshot};
pub use meta::{SyncMetaEntry, SyncMetaStore};
pub use store::LocalStore;
pub use table::{TableOp, Transaction};
pub use tenant::{StaticTenant, TenantCache, TenantResolver, TenantSource};
pub use types::{
    remote_wins, Entity, Record, RecordKey, StatusCounts, SyncStatus, TenantId, Timestamp,
};
