//! # fieldsync testkit
//!
//! Test utilities for fieldsync.
//!
//! This crate provides:
//! - Test fixtures: databases with a settable tenant and connectivity
//! - Builders for entities and server-side records
//! - Property-based test generators using proptest
//! - A sync harness wiring stores, mock remotes and a coordinator
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fieldsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn offline_add_is_queued() {
//!     let harness = SyncHarness::new();
//!     harness.db.set_online(false);
//!     harness.sections.store().add(section("Roof")).await.unwrap();
//!     // ...
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod builders;
pub mod fixtures;
pub mod generators;
pub mod harness;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::builders::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
}

pub use builders::*;
pub use fixtures::*;
pub use generators::*;
pub use harness::*;
