//! # fieldsync storage
//!
//! Append-only byte stores that back the fieldsync journals.
//!
//! A backend knows nothing about records, tenants or frames. It appends
//! bytes, reads them back by offset, and can be cut back to a shorter
//! length when a torn tail is discovered during replay or when a journal
//! is compacted into a snapshot.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - tests and throwaway stores
//! - [`FileBackend`] - one file per journal
//!
//! ```rust
//! use fieldsync_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
