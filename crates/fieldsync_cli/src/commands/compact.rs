//! Compact command implementation.

use super::inspect::format_size;
use crate::error::CliResult;
use fieldsync_core::Database;

/// Size of one journal before and after compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalCompaction {
    /// Entity kind.
    pub kind: String,
    /// Frames before.
    pub frames_before: usize,
    /// Frames after.
    pub frames_after: usize,
    /// Bytes before.
    pub bytes_before: u64,
    /// Bytes after.
    pub bytes_after: u64,
}

/// Compaction statistics.
#[derive(Debug, Default)]
pub struct CompactStats {
    /// Per-journal sizes, sorted by kind.
    pub journals: Vec<JournalCompaction>,
    /// Journals rewritten, the side-table included. Zero on a dry run.
    pub rewritten: usize,
}

impl CompactStats {
    /// Bytes before compaction.
    pub fn bytes_before(&self) -> u64 {
        self.journals.iter().map(|j| j.bytes_before).sum()
    }

    /// Bytes after compaction.
    pub fn bytes_after(&self) -> u64 {
        self.journals.iter().map(|j| j.bytes_after).sum()
    }
}

/// Runs the compact command. A dry run reports current sizes only.
pub fn run(db: &Database, dry_run: bool) -> CliResult<CompactStats> {
    let before = db.inspect()?;
    if dry_run {
        return Ok(CompactStats {
            journals: before
                .into_iter()
                .map(|j| JournalCompaction {
                    kind: j.kind,
                    frames_before: j.frames,
                    frames_after: j.frames,
                    bytes_before: j.bytes,
                    bytes_after: j.bytes,
                })
                .collect(),
            rewritten: 0,
        });
    }

    let rewritten = db.compact_all()?;
    let after = db.inspect()?;
    let journals = before
        .into_iter()
        .map(|b| {
            let a = after.iter().find(|a| a.kind == b.kind);
            JournalCompaction {
                frames_after: a.map_or(b.frames, |a| a.frames),
                bytes_after: a.map_or(b.bytes, |a| a.bytes),
                kind: b.kind,
                frames_before: b.frames,
                bytes_before: b.bytes,
            }
        })
        .collect();
    Ok(CompactStats { journals, rewritten })
}

/// Prints `stats` for a terminal.
pub fn print_text(stats: &CompactStats, dry_run: bool) {
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    for j in &stats.journals {
        println!(
            "  {:<18} {:>5} -> {:<5} frames  {} -> {}",
            j.kind,
            j.frames_before,
            j.frames_after,
            format_size(j.bytes_before),
            format_size(j.bytes_after)
        );
    }
    let (before, after) = (stats.bytes_before(), stats.bytes_after());
    println!();
    println!("  Size before: {}", format_size(before));
    println!("  Size after:  {}", format_size(after));
    if !dry_run {
        println!(
            "  Space saved: {} ({:.1}%)",
            format_size(before.saturating_sub(after)),
            if before > 0 {
                (before.saturating_sub(after) as f64 / before as f64) * 100.0
            } else {
                0.0
            }
        );
        println!("Compacted {} journal(s)", stats.rewritten);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{inspect, open, test_support::seeded_dir};

    #[tokio::test]
    async fn dry_run_changes_nothing() {
        let dir = seeded_dir().await;
        let db = open(dir.path()).unwrap();
        let stats = run(&db, true).unwrap();
        assert_eq!(stats.rewritten, 0);
        assert_eq!(stats.bytes_before(), stats.bytes_after());
        assert_eq!(
            inspect::collect(&db, None).unwrap().total_bytes,
            stats.bytes_before()
        );
    }

    #[tokio::test]
    async fn compaction_keeps_rows_and_shrinks_frames() {
        let dir = seeded_dir().await;
        let db = open(dir.path()).unwrap();
        let stats = run(&db, false).unwrap();

        // One entity journal plus the side-table.
        assert_eq!(stats.rewritten, 2);
        let section = &stats.journals[0];
        assert_eq!(section.kind, "section");
        assert!(section.frames_before > 1);
        assert_eq!(section.frames_after, 1);

        let report = inspect::collect(&db, None).unwrap();
        assert_eq!(report.journals[0].records, 4);
        assert_eq!(report.cursors.len(), 1);
    }
}
