//! JSON backups of students and issue records.
//!
//! Import is additive: students upsert on `(reg_no, course)`, records on
//! `id`, and nothing on the destination is ever deleted.

use std::fs;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::db::Row;
use crate::error::{BookdeskError, Result};
use crate::import::{
    fetch_all, BatchSummary, BatchWriter, PAGE_SIZE, STUDENT_CONFLICT, STUDENT_KEY,
};
use crate::library::{BOOK_ISSUES, STUDENTS};
use crate::query::{Client, UpsertOptions};

pub const BACKUP_VERSION: &str = "1.0";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatistics {
    pub total_students: usize,
    pub total_records: usize,
    pub issued_books: usize,
    pub returned_books: usize,
}

impl BackupStatistics {
    fn compute(students: &[Row], records: &[Row]) -> Self {
        let returned = records
            .iter()
            .filter(|r| r.get("status").and_then(Value::as_str) == Some("returned"))
            .count();
        Self {
            total_students: students.len(),
            total_records: records.len(),
            issued_books: records.len() - returned,
            returned_books: returned,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub version: String,
    #[serde(rename = "exportDate")]
    pub export_date: String,
    #[serde(rename = "exportedBy")]
    pub exported_by: String,
    #[serde(default)]
    pub students: Vec<Row>,
    #[serde(default)]
    pub book_issues: Vec<Row>,
    #[serde(default)]
    pub statistics: BackupStatistics,
}

impl Backup {
    pub fn new(exported_by: impl Into<String>, students: Vec<Row>, book_issues: Vec<Row>) -> Self {
        let statistics = BackupStatistics::compute(&students, &book_issues);
        Self {
            version: BACKUP_VERSION.to_string(),
            export_date: Utc::now().to_rfc3339(),
            exported_by: exported_by.into(),
            students,
            book_issues,
            statistics,
        }
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                BookdeskError::io(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| BookdeskError::internal(format!("Failed to serialize backup: {e}")))?;
        fs::write(path, text)
            .map_err(|e| BookdeskError::io(format!("Failed to write {}: {e}", path.display())))
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| BookdeskError::io(format!("Failed to read {}: {e}", path.display())))?;
        let backup: Self = serde_json::from_str(&text)
            .map_err(|e| BookdeskError::validation(format!("Invalid backup file: {e}")))?;
        backup.check_version()?;
        Ok(backup)
    }

    fn check_version(&self) -> Result<()> {
        let major = self.version.split('.').next().unwrap_or_default();
        if major != "1" {
            return Err(BookdeskError::validation(format!(
                "Unsupported backup version: {}",
                self.version
            )));
        }
        Ok(())
    }
}

/// Reads both tables into a backup document.
pub async fn export(client: &Client, exported_by: &str) -> Result<Backup> {
    let students = fetch_all(client, STUDENTS, "*", STUDENT_KEY, PAGE_SIZE).await?;
    let book_issues = fetch_all(client, BOOK_ISSUES, "*", &["id"], PAGE_SIZE).await?;
    info!(
        "exported {} students and {} records",
        students.len(),
        book_issues.len()
    );
    Ok(Backup::new(exported_by, students, book_issues))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub students: BatchSummary,
    pub book_issues: BatchSummary,
}

impl ImportSummary {
    pub fn failed(&self) -> usize {
        self.students.failed + self.book_issues.failed
    }
}

/// Strips the embedded relation and a null id so the store assigns one.
fn clean_record(mut row: Row) -> Row {
    row.retain(|key, value| key != "students" && !(key == "id" && value.is_null()));
    row
}

/// Restores a backup without deleting anything.
pub async fn import(client: &Client, backup: &Backup, batch_size: usize) -> Result<ImportSummary> {
    backup.check_version()?;

    let students = BatchWriter::new(client, STUDENTS, UpsertOptions::on_conflict(STUDENT_CONFLICT))
        .batch_size(batch_size)
        .write(backup.students.clone())
        .await;

    let (with_id, without_id): (Vec<Row>, Vec<Row>) = backup
        .book_issues
        .iter()
        .cloned()
        .map(clean_record)
        .partition(|row| row.contains_key("id"));

    let mut book_issues = BatchWriter::new(client, BOOK_ISSUES, UpsertOptions::on_conflict("id"))
        .batch_size(batch_size)
        .write(with_id)
        .await;

    let mut inserted = BatchSummary {
        table: BOOK_ISSUES.to_string(),
        total: without_id.len(),
        ..BatchSummary::default()
    };
    for chunk in without_id.chunks(batch_size.max(1)) {
        let response = client
            .from(BOOK_ISSUES)
            .insert(chunk.to_vec())
            .execute(client)
            .await;
        match response.error {
            None => inserted.written += chunk.len(),
            Some(message) => {
                warn!("record insert failed: {}", message);
                inserted.failed += chunk.len();
                inserted.failed_batches += 1;
                inserted.errors.push(message);
            }
        }
    }
    book_issues.merge(inserted);

    let summary = ImportSummary {
        students,
        book_issues,
    };
    info!(
        "backup restored: {} students, {} records, {} failed",
        summary.students.written,
        summary.book_issues.written,
        summary.failed()
    );
    Ok(summary)
}
