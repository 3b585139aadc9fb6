//! Error types for the sync engine.

use fieldsync_core::CoreError;
use std::fmt;
use thiserror::Error;

/// Result type for remote adapter calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors reported by a remote adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Connection failed or was dropped.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete in time.
    #[error("network timeout")]
    Timeout,

    /// The server failed (5xx).
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP-like status code.
        status: u16,
        /// Server message.
        message: String,
    },

    /// Too many requests (429).
    #[error("rate limited")]
    RateLimited,

    /// Missing or expired credentials (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The server rejected the payload (400, 422).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The item already exists remotely (409).
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The item does not exist remotely (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    /// Classifies an HTTP-like status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 | 422 => Self::Validation(message),
            401 => Self::Unauthorized(message),
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            408 => Self::Timeout,
            409 => Self::AlreadyExists(message),
            429 => Self::RateLimited,
            500..=599 => Self::Server { status, message },
            _ => Self::Other(format!("HTTP {status}: {message}")),
        }
    }

    /// Returns true for transient failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Network(_)
                | RemoteError::Timeout
                | RemoteError::Server { .. }
                | RemoteError::RateLimited
        )
    }
}

/// One store's failure inside a coordinator pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreFailure {
    /// Name of the store.
    pub store: String,
    /// Error message.
    pub message: String,
}

impl fmt::Display for StoreFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.store, self.message)
    }
}

/// Errors that abort a sync pass.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No tenant could be resolved; nothing was reconciled.
    #[error("no tenant resolvable")]
    NoTenant,

    /// Local store failure.
    #[error("local store error: {0}")]
    Core(#[from] CoreError),

    /// Remote failure outside per-record handling (listing, bespoke sync).
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// One or more stores failed during a coordinator pass.
    #[error("sync failed for {}", join_failures(.failures))]
    Aggregate {
        /// Per-store failures, in store order.
        failures: Vec<StoreFailure>,
    },

    /// A background sync task panicked or was cancelled.
    #[error("sync task failed: {0}")]
    Task(String),
}

impl SyncError {
    /// Returns true if retrying the pass may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Names of the failed stores, for aggregate errors.
    pub fn failed_stores(&self) -> Vec<&str> {
        match self {
            SyncError::Aggregate { failures } => {
                failures.iter().map(|f| f.store.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn join_failures(failures: &[StoreFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(
            RemoteError::from_status(401, "expired"),
            RemoteError::Unauthorized("expired".into())
        );
        assert_eq!(
            RemoteError::from_status(409, "dup"),
            RemoteError::AlreadyExists("dup".into())
        );
        assert_eq!(RemoteError::from_status(429, ""), RemoteError::RateLimited);
        assert!(matches!(
            RemoteError::from_status(503, "down"),
            RemoteError::Server { status: 503, .. }
        ));
        assert!(matches!(
            RemoteError::from_status(418, "teapot"),
            RemoteError::Other(_)
        ));
    }

    #[test]
    fn retryable_errors() {
        assert!(RemoteError::Network("reset".into()).is_retryable());
        assert!(RemoteError::Timeout.is_retryable());
        assert!(RemoteError::from_status(500, "boom").is_retryable());
        assert!(RemoteError::RateLimited.is_retryable());

        assert!(!RemoteError::Unauthorized("no".into()).is_retryable());
        assert!(!RemoteError::Forbidden("no".into()).is_retryable());
        assert!(!RemoteError::Validation("bad".into()).is_retryable());
        assert!(!RemoteError::AlreadyExists("a".into()).is_retryable());

        assert!(SyncError::from(RemoteError::Timeout).is_retryable());
        assert!(!SyncError::NoTenant.is_retryable());
    }

    #[test]
    fn aggregate_names_failed_stores() {
        let err = SyncError::Aggregate {
            failures: vec![StoreFailure {
                store: "section".into(),
                message: "unauthorized: expired".into(),
            }],
        };
        assert_eq!(err.failed_stores(), vec!["section"]);
        assert_eq!(
            err.to_string(),
            "sync failed for section: unauthorized: expired"
        );
    }
}
