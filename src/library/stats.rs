//! Aggregates over issue records: dashboard counts, per-student ledgers,
//! and the grouped books lists.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;

use super::models::{BookIssueRecord, IssueStatus, Student, StudentKey, DEFAULT_IN_OUT};
use crate::error::{BookdeskError, Result};

/// Headline counts shown on the dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    /// Every record ever written, returned or not.
    pub issued: usize,
    pub returned: usize,
    pub pending: usize,
    /// Distinct `(reg_no, course)` pairs currently "In".
    pub students: usize,
}

impl DashboardStats {
    pub fn compute(records: &[BookIssueRecord], students: &[Student]) -> Self {
        let returned = records
            .iter()
            .filter(|r| r.status == IssueStatus::Returned)
            .count();
        let pending = records.iter().filter(|r| r.is_pending()).count();
        let present: HashSet<StudentKey> = students
            .iter()
            .filter(|s| s.effective_status() == DEFAULT_IN_OUT)
            .map(Student::key)
            .collect();

        Self {
            issued: records.len(),
            returned,
            pending,
            students: present.len(),
        }
    }
}

/// Loan counts for a single student.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StudentLedger {
    pub student: Option<StudentKey>,
    /// Total records, returned or not.
    pub issued: usize,
    pub returned: usize,
    pub pending: usize,
}

impl StudentLedger {
    fn add(&mut self, record: &BookIssueRecord) {
        self.issued += 1;
        match record.status {
            IssueStatus::Issued => self.pending += 1,
            IssueStatus::Returned => self.returned += 1,
        }
    }

    /// Tallies records that all belong to one student.
    pub fn for_records(student: StudentKey, records: &[BookIssueRecord]) -> Self {
        let mut ledger = Self {
            student: Some(student),
            ..Self::default()
        };
        for record in records {
            ledger.add(record);
        }
        ledger
    }
}

/// Per-student ledgers in first-seen order.
pub fn student_ledgers(records: &[BookIssueRecord]) -> Vec<StudentLedger> {
    let mut order: Vec<StudentKey> = Vec::new();
    let mut ledgers: HashMap<StudentKey, StudentLedger> = HashMap::new();
    for record in records {
        let key = record.student_key();
        let ledger = ledgers.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            StudentLedger {
                student: Some(key),
                ..StudentLedger::default()
            }
        });
        ledger.add(record);
    }
    order
        .into_iter()
        .filter_map(|key| ledgers.remove(&key))
        .collect()
}

/// Which records a books list shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BooksListKind {
    /// Every record.
    Issued,
    Returned,
    /// Records still out.
    Pending,
}

impl BooksListKind {
    pub fn includes(&self, record: &BookIssueRecord) -> bool {
        match self {
            Self::Issued => true,
            Self::Returned => record.status == IssueStatus::Returned,
            Self::Pending => record.status == IssueStatus::Issued,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Issued => "Total Issued Books Report",
            Self::Returned => "Total Returned Books Report",
            Self::Pending => "Pending Books Report",
        }
    }
}

/// A student with the books selected for a list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentBooks {
    pub reg_no: String,
    pub course: String,
    pub name: String,
    pub year: String,
    pub books: Vec<BookIssueRecord>,
}

/// Groups records by `(reg_no, course)` in first-seen order.
///
/// Student details come from the embedded `students` relation when present.
pub fn group_books(records: &[BookIssueRecord], kind: BooksListKind) -> Vec<StudentBooks> {
    let mut groups: Vec<StudentBooks> = Vec::new();
    let mut index: HashMap<StudentKey, usize> = HashMap::new();

    for record in records.iter().filter(|r| kind.includes(r)) {
        let key = record.student_key();
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            let summary = record.students.clone().unwrap_or_default();
            groups.push(StudentBooks {
                reg_no: key.reg_no.clone(),
                course: key.course.clone(),
                name: summary.name.unwrap_or_default(),
                year: summary.year.unwrap_or_default(),
                books: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].books.push(record.clone());
    }
    groups
}

/// Keeps groups matching the optional year and course filters.
pub fn filter_groups(
    groups: Vec<StudentBooks>,
    year: Option<&str>,
    course: Option<&str>,
) -> Vec<StudentBooks> {
    groups
        .into_iter()
        .filter(|g| year.map_or(true, |y| g.year == y))
        .filter(|g| course.map_or(true, |c| g.course == c))
        .collect()
}

/// Sorted distinct years and courses, for filter pickers.
pub fn filter_options(groups: &[StudentBooks]) -> (Vec<String>, Vec<String>) {
    let years: BTreeSet<String> = groups.iter().map(|g| g.year.clone()).collect();
    let courses: BTreeSet<String> = groups.iter().map(|g| g.course.clone()).collect();
    (years.into_iter().collect(), courses.into_iter().collect())
}

/// Printable list as CSV: one row per student, book names joined with `; `.
pub fn books_list_csv(groups: &[StudentBooks]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let csv_err = |e: csv::Error| BookdeskError::io(format!("Failed to write CSV: {e}"));

    writer
        .write_record(["S.No", "Name", "Reg No", "Year", "Course", "Books", "Count"])
        .map_err(csv_err)?;
    for (i, group) in groups.iter().enumerate() {
        let books = group
            .books
            .iter()
            .map(|b| b.book_name.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        writer
            .write_record([
                (i + 1).to_string(),
                group.name.clone(),
                group.reg_no.clone(),
                group.year.clone(),
                group.course.clone(),
                books,
                group.books.len().to_string(),
            ])
            .map_err(csv_err)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| BookdeskError::io(format!("Failed to flush CSV: {e}")))?;
    String::from_utf8(bytes).map_err(|e| BookdeskError::internal(e.to_string()))
}
