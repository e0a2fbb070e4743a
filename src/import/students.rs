//! Student import from the registrar's CSV export.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::batch::{BatchSummary, BatchWriter};
use crate::error::{BookdeskError, Result};
use crate::library::models::DEFAULT_IN_OUT;
use crate::library::{Student, StudentKey, STUDENTS};
use crate::query::{to_rows, Client, UpsertOptions};

/// Conflict target for student upserts.
pub const STUDENT_CONFLICT: &str = "reg_no,course";

/// Columns that identify a student row, for stable paging.
pub const STUDENT_KEY: &[&str] = &["reg_no", "course"];

#[derive(Debug, Deserialize)]
struct CsvStudent {
    #[serde(rename = "Reg No", default)]
    reg_no: Option<String>,
    #[serde(rename = "Sl No", default)]
    sl_no: Option<String>,
    #[serde(rename = "Student Name", default)]
    name: Option<String>,
    #[serde(rename = "Father Name", default)]
    father: Option<String>,
    #[serde(rename = "Year", default)]
    year: Option<String>,
    #[serde(rename = "Course", default)]
    course: Option<String>,
    #[serde(rename = "In/Out", default)]
    in_out: Option<String>,
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl CsvStudent {
    fn into_student(self, has_in_out: bool) -> Option<Student> {
        let reg_no = present(self.reg_no).or_else(|| present(self.sl_no))?;
        let in_out = if has_in_out {
            Some(present(self.in_out).unwrap_or_else(|| DEFAULT_IN_OUT.to_string()))
        } else {
            None
        };
        Some(Student {
            reg_no,
            name: present(self.name)?,
            father: present(self.father)?,
            year: present(self.year)?,
            course: present(self.course)?,
            in_out,
            created_at: None,
            updated_at: None,
        })
    }
}

/// Students read from a CSV, after cleaning.
#[derive(Debug, Clone, Default)]
pub struct ParsedStudents {
    pub students: Vec<Student>,
    /// Whether the file carried an `In/Out` column.
    pub has_in_out: bool,
    pub rows_read: usize,
    /// Rows missing a required field.
    pub incomplete: usize,
    /// Repeats of an earlier `(reg_no, course)`.
    pub duplicates: usize,
}

/// Parses and cleans student rows. The first occurrence of each
/// `(reg_no, course)` wins.
pub fn parse_students<R: Read>(reader: R) -> Result<ParsedStudents> {
    let mut csv = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let has_in_out = csv
        .headers()
        .map_err(|e| BookdeskError::io(format!("Failed to read CSV headers: {e}")))?
        .iter()
        .any(|h| h == "In/Out");

    let mut parsed = ParsedStudents {
        has_in_out,
        ..ParsedStudents::default()
    };
    let mut seen: HashSet<StudentKey> = HashSet::new();

    for record in csv.deserialize::<CsvStudent>() {
        let record = record.map_err(|e| BookdeskError::io(format!("Malformed CSV row: {e}")))?;
        parsed.rows_read += 1;

        let Some(student) = record.into_student(has_in_out) else {
            parsed.incomplete += 1;
            continue;
        };
        if seen.insert(student.key()) {
            parsed.students.push(student);
        } else {
            parsed.duplicates += 1;
        }
    }

    Ok(parsed)
}

/// Result of an import run.
#[derive(Debug, Clone, Serialize)]
pub struct StudentImport {
    pub rows_read: usize,
    pub incomplete: usize,
    pub duplicates: usize,
    pub summary: BatchSummary,
}

/// Reads `path` and upserts its students on `(reg_no, course)`.
pub async fn import_students(client: &Client, path: &Path, batch_size: usize) -> Result<StudentImport> {
    let file = File::open(path)
        .map_err(|e| BookdeskError::io(format!("Failed to open {}: {e}", path.display())))?;
    let parsed = parse_students(file)?;

    info!(
        "found {} students in CSV, {} valid ({} incomplete, {} duplicates removed)",
        parsed.rows_read,
        parsed.students.len(),
        parsed.incomplete,
        parsed.duplicates
    );

    let mut rows = to_rows(&parsed.students)?;
    if !parsed.has_in_out {
        for row in &mut rows {
            row.retain(|key, _| key != "in_out");
        }
    }

    let summary = BatchWriter::new(client, STUDENTS, UpsertOptions::on_conflict(STUDENT_CONFLICT))
        .batch_size(batch_size)
        .write(rows)
        .await;

    info!(
        "import completed: {} written, {} failed",
        summary.written, summary.failed
    );

    Ok(StudentImport {
        rows_read: parsed.rows_read,
        incomplete: parsed.incomplete,
        duplicates: parsed.duplicates,
        summary,
    })
}
