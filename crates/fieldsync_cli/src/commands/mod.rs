//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod reset_cursor;

use crate::error::{CliError, CliResult};
use fieldsync_core::{Connectivity, Database, StaticTenant, StoreConfig, TenantResolver};
use std::path::Path;
use std::sync::Arc;

/// Opens an existing database directory for maintenance: no tenant, offline.
pub fn open(path: &Path) -> CliResult<Database> {
    if !path.is_dir() {
        return Err(CliError::NotFound(path.to_path_buf()));
    }
    let db = Database::open(
        path,
        StoreConfig::default(),
        Arc::new(StaticTenant::new(None)) as Arc<dyn TenantResolver>,
        Connectivity::new(false),
    )?;
    Ok(db)
}
