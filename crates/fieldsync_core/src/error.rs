//! Error types for fieldsync core.

use crate::types::SyncStatus;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by local stores and their persistence.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] fieldsync_storage::StorageError),

    /// I/O error outside a storage backend (directory handling, lock file).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record or journal payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The journal holds a damaged frame that is not its tail.
    #[error("journal corruption at offset {offset}: {message}")]
    JournalCorruption {
        /// Offset of the damaged frame.
        offset: u64,
        /// Description of the damage.
        message: String,
    },

    /// A frame failed its checksum and more frames follow it.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the frame.
        offset: u64,
        /// Checksum stored in the frame.
        expected: u32,
        /// Checksum computed over the frame.
        actual: u32,
    },

    /// No record with this id exists for the current tenant.
    #[error("{kind} record not found: {id}")]
    NotFound {
        /// Entity kind.
        kind: &'static str,
        /// Record id.
        id: String,
    },

    /// The record's status forbids the requested mutation.
    #[error("{kind} record {id} cannot be modified while {status:?}")]
    InvalidState {
        /// Entity kind.
        kind: &'static str,
        /// Record id.
        id: String,
        /// Current status.
        status: SyncStatus,
    },

    /// No tenant could be resolved.
    #[error("no tenant resolvable")]
    NoTenant,

    /// Another process holds the database directory.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation was rejected.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl std::fmt::Display) -> Self {
        Self::Codec(message.to_string())
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the error means the local persistence layer is unusable.
    pub fn is_persistence_failure(&self) -> bool {
        matches!(
            self,
            CoreError::Storage(_)
                | CoreError::Io(_)
                | CoreError::JournalCorruption { .. }
                | CoreError::ChecksumMismatch { .. }
                | CoreError::DatabaseLocked
        )
    }
}
