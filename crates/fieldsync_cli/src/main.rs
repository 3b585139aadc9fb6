//! fieldsync CLI
//!
//! Maintenance tools for a fieldsync database directory. The app must be
//! closed: the directory lock admits one process at a time.
//!
//! # Commands
//!
//! - `inspect` - Display journal sizes, per-tenant status counts and sync cursors
//! - `reset-cursor` - Forget last-sync times so the next pass is a full pull
//! - `compact` - Rewrite journals down to their live rows
//! - `version` - Show version information

mod commands;
mod error;

use clap::{Parser, Subcommand, ValueEnum};
use error::{CliError, CliResult};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// fieldsync database tools.
#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display journal statistics, status counts and sync cursors
    Inspect {
        /// Only show this tenant
        #[arg(short, long)]
        tenant: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Clear last-sync times, forcing the next pass to pull everything
    ResetCursor {
        /// Only this entity kind
        #[arg(short, long)]
        kind: Option<String>,

        /// Only this tenant
        #[arg(short, long)]
        tenant: Option<String>,
    },

    /// Compact every journal
    Compact {
        /// Dry run - show sizes without rewriting
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Inspect { .. } => "inspect",
            Commands::ResetCursor { .. } => "reset-cursor",
            Commands::Compact { .. } => "compact",
            Commands::Version => "version",
        }
    }
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("fieldsync CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("Journal format v{}", fieldsync_core::JOURNAL_VERSION);
        return Ok(());
    }

    let path = cli.path.ok_or(CliError::MissingPath(cli.command.name()))?;
    let db = commands::open(&path)?;

    match cli.command {
        Commands::Inspect { tenant, format } => {
            let report = commands::inspect::collect(&db, tenant.as_deref())?;
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                Format::Text => commands::inspect::print_text(&report),
            }
        }
        Commands::ResetCursor { kind, tenant } => {
            let cleared = commands::reset_cursor::run(&db, kind.as_deref(), tenant.as_deref())?;
            println!("Cleared {cleared} sync cursor(s)");
        }
        Commands::Compact { dry_run } => {
            let stats = commands::compact::run(&db, dry_run)?;
            commands::compact::print_text(&stats, dry_run);
        }
        Commands::Version => {}
    }

    Ok(())
}
