//! Durable `(entity kind, tenant) -> last sync time` side-table.
//!
//! The sync engine reads it to choose between delta and full pulls and
//! writes it after every successful pass. Clearing an entry forces the
//! next pass to pull everything.

use crate::error::CoreResult;
use crate::journal::{decode_cbor, encode_cbor, FrameType, Journal};
use crate::types::{TenantId, Timestamp};
use fieldsync_storage::StorageBackend;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum MetaOp {
    Set {
        kind: String,
        tenant_id: TenantId,
        at: Timestamp,
    },
    Clear {
        kind: Option<String>,
        tenant_id: Option<TenantId>,
    },
}

type Entries = BTreeMap<(String, TenantId), Timestamp>;

/// One side-table row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetaEntry {
    /// Entity kind.
    pub kind: String,
    /// Tenant.
    pub tenant_id: TenantId,
    /// Start time of the last successful sync pass.
    pub last_sync: Timestamp,
}

/// The last-sync side-table.
pub struct SyncMetaStore {
    journal: Journal,
    entries: RwLock<Entries>,
}

impl SyncMetaStore {
    /// Opens the side-table, replaying its journal.
    pub fn open(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> CoreResult<Self> {
        let journal = Journal::new(backend, sync_on_commit);
        let mut entries = Entries::new();
        for frame in journal.replay()? {
            match frame.frame_type {
                FrameType::Batch => {
                    let op: MetaOp = decode_cbor(&frame.payload)?;
                    apply(&mut entries, op);
                }
                FrameType::Snapshot => {
                    let rows: Vec<SyncMetaEntry> = decode_cbor(&frame.payload)?;
                    entries = rows
                        .into_iter()
                        .map(|e| ((e.kind, e.tenant_id), e.last_sync))
                        .collect();
                }
            }
        }
        Ok(Self {
            journal,
            entries: RwLock::new(entries),
        })
    }

    /// Returns the last sync time for `kind` and `tenant_id`.
    pub fn get_last_sync(&self, kind: &str, tenant_id: &TenantId) -> Option<Timestamp> {
        self.entries
            .read()
            .get(&(kind.to_string(), tenant_id.clone()))
            .copied()
    }

    /// Records a successful sync pass that started at `at`.
    pub fn set_last_sync(&self, kind: &str, tenant_id: &TenantId, at: Timestamp) -> CoreResult<()> {
        let op = MetaOp::Set {
            kind: kind.to_string(),
            tenant_id: tenant_id.clone(),
            at,
        };
        self.commit(op)
    }

    /// Removes matching entries and returns how many were removed. `None`
    /// matches any kind or any tenant.
    pub fn clear(&self, kind: Option<&str>, tenant_id: Option<&TenantId>) -> CoreResult<usize> {
        let removed = self
            .entries
            .read()
            .keys()
            .filter(|key| matches(key, kind, tenant_id))
            .count();
        if removed == 0 {
            return Ok(0);
        }
        self.commit(MetaOp::Clear {
            kind: kind.map(str::to_string),
            tenant_id: tenant_id.cloned(),
        })?;
        debug!(removed, ?kind, tenant = ?tenant_id, "cleared sync cursors");
        Ok(removed)
    }

    /// All entries, ordered by kind then tenant.
    pub fn entries(&self) -> Vec<SyncMetaEntry> {
        self.entries
            .read()
            .iter()
            .map(|((kind, tenant_id), at)| SyncMetaEntry {
                kind: kind.clone(),
                tenant_id: tenant_id.clone(),
                last_sync: *at,
            })
            .collect()
    }

    /// Rewrites the journal as a single snapshot.
    pub fn compact(&self) -> CoreResult<()> {
        let entries = self.entries.read();
        let rows: Vec<SyncMetaEntry> = entries
            .iter()
            .map(|((kind, tenant_id), at)| SyncMetaEntry {
                kind: kind.clone(),
                tenant_id: tenant_id.clone(),
                last_sync: *at,
            })
            .collect();
        self.journal
            .rewrite(FrameType::Snapshot, &encode_cbor(&rows)?)
    }

    /// Number of frames in the journal.
    pub fn frame_count(&self) -> usize {
        self.journal.frame_count()
    }

    fn commit(&self, op: MetaOp) -> CoreResult<()> {
        let mut entries = self.entries.write();
        self.journal.append(FrameType::Batch, &encode_cbor(&op)?)?;
        apply(&mut entries, op);
        Ok(())
    }
}

fn matches(key: &(String, TenantId), kind: Option<&str>, tenant_id: Option<&TenantId>) -> bool {
    kind.map_or(true, |k| key.0 == k) && tenant_id.map_or(true, |t| &key.1 == t)
}

fn apply(entries: &mut Entries, op: MetaOp) {
    match op {
        MetaOp::Set { kind, tenant_id, at } => {
            entries.insert((kind, tenant_id), at);
        }
        MetaOp::Clear { kind, tenant_id } => {
            entries.retain(|key, _| !matches(key, kind.as_deref(), tenant_id.as_ref()));
        }
    }
}
