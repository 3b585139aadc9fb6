//! # fieldsync sync engine
//!
//! Reconciliation of local stores with their remote backends.
//!
//! This crate provides:
//! - [`RemoteAdapter`], the per-entity contract with the server
//! - [`EntitySyncEngine`], the delete → pull → push pass for one store
//! - [`SyncCoordinator`], which drives every store one after another
//! - Retry with exponential backoff and jitter for transient failures
//! - A trailing-edge [`Debouncer`] for mutation-triggered syncs
//!
//! ## Architecture
//!
//! Local stores are the source of truth for the UI. A pass:
//! 1. Sends pending deletions and archive side-effects
//! 2. Pulls remote changes (delta since the last successful pass when known)
//!    and merges them last-writer-wins on `updated_at`
//! 3. Pushes queued and failed records, guessing create vs update and
//!    falling back when the server disagrees
//!
//! ## Key Invariants
//!
//! - At most one pass per store at a time; a second caller returns at once
//! - At most one coordinator pass at a time; concurrent callers share it
//! - Phases run in order and each commits in one local transaction
//! - A record pending deletion is never overwritten by a pull
//! - The last-sync time only advances after a complete pass
//! - Only transient failures are retried

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod debounce;
mod engine;
mod error;
mod mock;
mod remote;
mod retry;
mod task;
mod upload;

pub use config::{CoordinatorConfig, EngineConfig, RetryConfig};
pub use coordinator::{CoordinatorState, SyncAllReport, SyncCoordinator, SyncTarget};
pub use debounce::Debouncer;
pub use engine::{EntitySyncEngine, SyncMode, SyncReport, SyncState, SyncStats};
pub use error::{RemoteError, RemoteResult, StoreFailure, SyncError, SyncResult};
pub use mock::{MockRemote, RemoteOp};
pub use remote::{CustomSync, ListOptions, RemoteAdapter};
pub use retry::{retry_with_backoff, retry_with_backoff_notify};
pub use task::TaskHandle;
pub use upload::UploadEngine;
