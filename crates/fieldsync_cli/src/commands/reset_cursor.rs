//! Reset-cursor command implementation.

use crate::error::CliResult;
use fieldsync_core::{Database, TenantId};
use tracing::info;

/// Clears last-sync times matching `kind` and `tenant`; `None` matches all.
/// Returns the number of cursors removed.
pub fn run(db: &Database, kind: Option<&str>, tenant: Option<&str>) -> CliResult<usize> {
    let tenant = tenant.map(TenantId::new);
    let cleared = db.meta().clear(kind, tenant.as_ref())?;
    info!(?kind, tenant = ?tenant, cleared, "sync cursors reset");
    Ok(cleared)
}
