//! Copies students, staff, and issue records from one database to another.

use serde::Serialize;
use tracing::{info, warn};

use super::batch::{BatchSummary, BatchWriter};
use super::fetch_all;
use super::students::{STUDENT_CONFLICT, STUDENT_KEY};
use crate::error::Result;
use crate::library::{BOOK_ISSUES, STUDENTS};
use crate::query::{Client, UpsertOptions};

/// Rows read from the source per request.
pub const PAGE_SIZE: u64 = 1000;

const STAFF: &str = "staff";

/// Row count of a destination table after the copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCount {
    pub table: String,
    pub rows: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub tables: Vec<BatchSummary>,
    pub skipped: Vec<String>,
    pub counts: Vec<TableCount>,
}

impl MigrationReport {
    pub fn failed(&self) -> usize {
        self.tables.iter().map(|t| t.failed).sum()
    }
}

struct TablePlan {
    table: &'static str,
    key: &'static [&'static str],
    options: UpsertOptions,
    /// Skip the table instead of failing when the source cannot be read.
    optional: bool,
}

fn plan() -> [TablePlan; 3] {
    [
        TablePlan {
            table: STUDENTS,
            key: STUDENT_KEY,
            options: UpsertOptions::on_conflict(STUDENT_CONFLICT),
            optional: false,
        },
        TablePlan {
            table: STAFF,
            key: &["staff_id"],
            options: UpsertOptions::on_conflict("staff_id").ignore_duplicates(),
            optional: true,
        },
        TablePlan {
            table: BOOK_ISSUES,
            key: &["id"],
            options: UpsertOptions::on_conflict("id"),
            optional: false,
        },
    ]
}

async fn count_rows(client: &Client, table: &str) -> Result<i64> {
    let rows = client
        .transport()
        .execute(&format!("SELECT COUNT(*)::bigint AS count FROM {table}"), &[])
        .await?;
    Ok(rows
        .first()
        .and_then(|row| row.get("count"))
        .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .unwrap_or(0))
}

/// Copies every table in dependency order, students before the records
/// that reference them.
///
/// Failed batches are retried row by row so one bad row does not cost its
/// whole batch. Nothing is deleted on the destination.
pub async fn migrate(
    source: &Client,
    dest: &Client,
    page_size: u64,
    batch_size: usize,
) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();

    for step in plan() {
        info!(table = step.table, "migrating");
        let rows = match fetch_all(source, step.table, "*", step.key, page_size).await {
            Ok(rows) => rows,
            Err(e) if step.optional => {
                warn!(table = step.table, "skipping: {}", e.message());
                report.skipped.push(step.table.to_string());
                continue;
            }
            Err(e) => return Err(e),
        };
        info!(table = step.table, "found {} rows", rows.len());

        let summary = BatchWriter::new(dest, step.table, step.options)
            .batch_size(batch_size)
            .retry_rows(true)
            .write(rows)
            .await;
        info!(
            table = step.table,
            "migrated {}/{} rows", summary.written, summary.total
        );
        report.tables.push(summary);
    }

    for summary in &report.tables {
        match count_rows(dest, &summary.table).await {
            Ok(rows) => report.counts.push(TableCount {
                table: summary.table.clone(),
                rows,
            }),
            Err(e) => warn!(table = %summary.table, "count failed: {}", e.message()),
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RecordingTransport;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_migrates_in_order_and_skips_missing_staff() {
        let source = Arc::new(RecordingTransport::new());
        source.push_json(vec![json!({"reg_no": "S1", "course": "CSE", "name": "Asha"})]);
        source.push_error("relation \"staff\" does not exist");
        source.push_json(vec![
            json!({"id": "a", "student_reg_no": "S1", "book_name": "Dune"}),
            json!({"id": "b", "student_reg_no": "S1", "book_name": "Emma"}),
        ]);

        let dest = Arc::new(RecordingTransport::new());
        dest.push_rows(vec![]);
        dest.push_rows(vec![]);
        dest.push_json(vec![json!({"count": 1})]);
        dest.push_json(vec![json!({"count": 2})]);

        let report = migrate(
            &Client::new(source.clone()),
            &Client::new(dest.clone()),
            PAGE_SIZE,
            100,
        )
        .await
        .unwrap();

        assert_eq!(report.skipped, vec!["staff".to_string()]);
        assert_eq!(report.tables.len(), 2);
        assert_eq!(report.failed(), 0);
        assert_eq!(
            report.counts,
            vec![
                TableCount { table: "students".into(), rows: 1 },
                TableCount { table: "book_issues".into(), rows: 2 },
            ]
        );

        let writes = dest.statements();
        assert!(writes[0].sql.contains("ON CONFLICT (reg_no, course) DO UPDATE"));
        assert!(writes[1].sql.starts_with("INSERT INTO book_issues"));
        assert!(writes[1].sql.contains("ON CONFLICT (id) DO UPDATE"));
    }

    #[tokio::test]
    async fn test_unreadable_students_aborts() {
        let source = Arc::new(RecordingTransport::new());
        source.push_error("permission denied");
        let dest = Arc::new(RecordingTransport::new());

        let result = migrate(&Client::new(source), &Client::new(dest.clone()), PAGE_SIZE, 100).await;
        assert!(result.is_err());
        assert!(dest.statements().is_empty());
    }
}
