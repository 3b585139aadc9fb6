//! Change feed for observing committed store mutations.
//!
//! A store emits on its feed after every commit. Two kinds of listeners
//! consume it:
//! - live queries, which re-run when their tenant's rows change
//! - the sync engine's auto-sync task, which turns local mutations into
//!   debounced sync passes
//!
//! Signals are only emitted after the journal frame is durable.

use crate::types::TenantId;
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Where a committed change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A user-facing mutation (`add`, `update`, `remove`, ...).
    Local,
    /// The sync engine applying server-confirmed state.
    Sync,
}

/// A committed change to one tenant's rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Entity kind of the store.
    pub kind: &'static str,
    /// Tenant whose rows changed.
    pub tenant_id: TenantId,
    /// Who made the change.
    pub origin: Origin,
    /// Ids of the touched records.
    pub ids: Vec<String>,
}

/// A request for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequest {
    /// Local mutations are waiting; coalesce before syncing.
    Debounced {
        /// Tenant with pending changes.
        tenant_id: TenantId,
    },
    /// First query for a tenant found no local rows; fetch everything now.
    Initial {
        /// Tenant to populate.
        tenant_id: TenantId,
    },
}

/// A message on a store's change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSignal {
    /// Rows changed.
    Changed(ChangeEvent),
    /// The store asks for a sync pass.
    Sync(SyncRequest),
    /// Live queries should re-resolve their tenant and re-run.
    Refresh,
}

/// Fans store signals out to any number of subscribers.
///
/// Subscribers whose receiver was dropped are pruned on the next emit.
#[derive(Debug, Default)]
pub struct ChangeFeed {
    subscribers: RwLock<Vec<UnboundedSender<StoreSignal>>>,
}

impl ChangeFeed {
    /// Creates a feed with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to every future signal.
    pub fn subscribe(&self) -> UnboundedReceiver<StoreSignal> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Sends a signal to every live subscriber.
    pub fn emit(&self, signal: StoreSignal) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(signal.clone()).is_ok());
    }

    /// Number of live subscribers as of the last emit.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
