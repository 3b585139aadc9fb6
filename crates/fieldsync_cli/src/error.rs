//! CLI error types.

use fieldsync_core::CoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// The command needs `--path`.
    #[error("database path required for {0}")]
    MissingPath(&'static str),

    /// Nothing at the given path.
    #[error("no database found at {}", .0.display())]
    NotFound(PathBuf),

    /// Error from the database.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Error writing JSON output.
    #[error("json output failed: {0}")]
    Json(#[from] serde_json::Error),
}
