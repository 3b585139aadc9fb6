//! Inspect command implementation.

use crate::error::CliResult;
use fieldsync_core::{Database, JournalSummary, StatusCounts, SyncMetaEntry, TenantId};
use serde::Serialize;

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectReport {
    /// Database path.
    pub path: String,
    /// Total journal size in bytes, side-table excluded.
    pub total_bytes: u64,
    /// One summary per entity kind.
    pub journals: Vec<JournalSummary>,
    /// Last-sync cursors.
    pub cursors: Vec<SyncMetaEntry>,
}

/// Collects journal summaries and cursors, optionally for one tenant only.
pub fn collect(db: &Database, tenant: Option<&str>) -> CliResult<InspectReport> {
    let tenant = tenant.map(TenantId::new);
    let mut journals = db.inspect()?;
    let mut cursors = db.meta().entries();

    if let Some(tenant) = &tenant {
        for journal in &mut journals {
            journal.tenants.retain(|t, _| t == tenant);
        }
        cursors.retain(|c| &c.tenant_id == tenant);
    }

    Ok(InspectReport {
        path: db
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<memory>".into()),
        total_bytes: journals.iter().map(|j| j.bytes).sum(),
        journals,
        cursors,
    })
}

/// Prints `report` for a terminal.
pub fn print_text(report: &InspectReport) {
    println!("fieldsync Database Inspection");
    println!("=============================");
    println!();
    println!("Path: {}", report.path);
    println!("Journals: {} ({})", report.journals.len(), format_size(report.total_bytes));

    for journal in &report.journals {
        println!();
        println!(
            "[{}] {} frames, {} rows, {}",
            journal.kind,
            journal.frames,
            journal.records,
            format_size(journal.bytes)
        );
        for (tenant, counts) in &journal.tenants {
            println!("  {tenant}: {}", describe_counts(counts));
        }
    }

    println!();
    if report.cursors.is_empty() {
        println!("Sync cursors: none");
    } else {
        println!("Sync cursors:");
        for cursor in &report.cursors {
            println!(
                "  {} / {}: {} ms",
                cursor.kind,
                cursor.tenant_id,
                cursor.last_sync.as_millis()
            );
        }
    }
}

fn describe_counts(counts: &StatusCounts) -> String {
    let parts = [
        ("draft", counts.draft),
        ("queued", counts.queued),
        ("synced", counts.synced),
        ("failed", counts.failed),
        ("pending delete", counts.pending_delete),
        ("archived", counts.archived),
    ];
    let described: Vec<String> = parts
        .iter()
        .filter(|(_, n)| *n > 0)
        .map(|(label, n)| format!("{n} {label}"))
        .collect();
    if described.is_empty() {
        "empty".into()
    } else {
        described.join(", ")
    }
}

pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{open, test_support::seeded_dir};

    #[tokio::test]
    async fn reports_closed_journals_per_tenant() {
        let dir = seeded_dir().await;
        let db = open(dir.path()).unwrap();
        let report = collect(&db, None).unwrap();

        let sections = report
            .journals
            .iter()
            .find(|j| j.kind == "section")
            .unwrap();
        assert_eq!(sections.records, 4);
        assert_eq!(sections.tenants.len(), 2);
        let first = &sections.tenants[&TenantId::new("tenant-1")];
        assert_eq!(first.queued, 2);
        assert_eq!(first.pending_delete, 1);
        assert_eq!(report.cursors.len(), 1);
        assert!(report.total_bytes > 0);
    }

    #[tokio::test]
    async fn tenant_filter_hides_other_tenants() {
        let dir = seeded_dir().await;
        let db = open(dir.path()).unwrap();
        let report = collect(&db, Some("tenant-2")).unwrap();

        let sections = report
            .journals
            .iter()
            .find(|j| j.kind == "section")
            .unwrap();
        assert_eq!(sections.tenants.len(), 1);
        assert_eq!(sections.tenants[&TenantId::new("tenant-2")].queued, 1);
        assert!(report.cursors.is_empty());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["journals"][0]["kind"], "section");
    }

    #[test]
    fn counts_are_described_without_zeros() {
        let mut counts = StatusCounts::default();
        assert_eq!(describe_counts(&counts), "empty");
        counts.add(fieldsync_core::SyncStatus::Queued, 2);
        counts.add(fieldsync_core::SyncStatus::Failed, 1);
        assert_eq!(describe_counts(&counts), "2 queued, 1 failed");
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
