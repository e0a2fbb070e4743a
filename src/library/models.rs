//! Domain types for students and book issue records.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use crate::db::Row;
use crate::error::{BookdeskError, Result};

/// Status given to students with no explicit `in_out`.
pub const DEFAULT_IN_OUT: &str = "In";

/// Natural key of a student. The same register number can appear under
/// several courses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StudentKey {
    pub reg_no: String,
    pub course: String,
}

impl StudentKey {
    pub fn new(reg_no: impl Into<String>, course: impl Into<String>) -> Self {
        Self {
            reg_no: reg_no.into(),
            course: course.into(),
        }
    }
}

impl std::fmt::Display for StudentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.reg_no, self.course)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub reg_no: String,
    pub course: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub father: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub year: String,
    #[serde(default)]
    pub in_out: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

impl Student {
    pub fn key(&self) -> StudentKey {
        StudentKey::new(&self.reg_no, &self.course)
    }

    /// `in_out`, or `"In"` when the column is unset.
    pub fn effective_status(&self) -> &str {
        self.in_out.as_deref().unwrap_or(DEFAULT_IN_OUT)
    }
}

/// Student columns embedded into a record by `select("*, students(...)")`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentSummary {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub reg_no: Option<String>,
    #[serde(default)]
    pub course: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub in_out: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    Issued,
    Returned,
}

impl IssueStatus {
    /// The only status consistent with the given return date.
    pub fn for_return_date(return_date: Option<&str>) -> Self {
        match return_date {
            Some(_) => Self::Returned,
            None => Self::Issued,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issued => "issued",
            Self::Returned => "returned",
        }
    }
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lending of one book to one student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookIssueRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub student_reg_no: String,
    #[serde(default)]
    pub student_course: Option<String>,
    pub book_name: String,
    pub author: String,
    pub book_no: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semester: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_no: Option<String>,
    pub issue_date: String,
    #[serde(default)]
    pub return_date: Option<String>,
    pub status: IssueStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub students: Option<StudentSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl BookIssueRecord {
    /// True while the book is still out.
    pub fn is_pending(&self) -> bool {
        self.status == IssueStatus::Issued
    }

    /// Records the return and flips the status with it.
    pub fn mark_returned(&mut self, date: NaiveDate) {
        self.return_date = Some(format_date(date));
        self.status = IssueStatus::Returned;
    }

    /// Whether `status` agrees with `return_date`.
    pub fn is_consistent(&self) -> bool {
        self.status == IssueStatus::for_return_date(self.return_date.as_deref())
    }

    /// Student key, falling back to the embedded relation for records
    /// written without a course.
    pub fn student_key(&self) -> StudentKey {
        let course = self
            .student_course
            .clone()
            .or_else(|| self.students.as_ref().and_then(|s| s.course.clone()))
            .unwrap_or_default();
        StudentKey::new(&self.student_reg_no, course)
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parses a `YYYY-MM-DD` date, naming the field on failure.
pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        BookdeskError::validation(format!("{field} must be a date (YYYY-MM-DD), got '{value}'"))
    })
}

/// A book to issue, as entered at the desk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueRequest {
    pub book_name: String,
    pub author: String,
    pub book_no: String,
    pub issue_date: String,
    #[serde(default)]
    pub semester: Option<String>,
    #[serde(default)]
    pub phone_no: Option<String>,
}

impl IssueRequest {
    /// Validates the entry and turns it into a new `issued` record.
    pub fn into_record(self, student: &StudentKey) -> Result<BookIssueRecord> {
        let book_name = self.book_name.trim().to_string();
        let author = self.author.trim().to_string();
        let book_no = self.book_no.trim().to_string();
        let issue_date = self.issue_date.trim().to_string();

        if book_name.is_empty() || author.is_empty() || book_no.is_empty() || issue_date.is_empty() {
            return Err(BookdeskError::validation(
                "Please fill in all required fields",
            ));
        }
        parse_date("issue_date", &issue_date)?;

        Ok(BookIssueRecord {
            id: None,
            student_reg_no: student.reg_no.clone(),
            student_course: Some(student.course.clone()),
            book_name,
            author,
            book_no,
            semester: non_blank(self.semester),
            phone_no: non_blank(self.phone_no),
            issue_date,
            return_date: None,
            status: IssueStatus::Issued,
            students: None,
            created_at: None,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Administrative correction of an existing record. `None` leaves a field
/// alone; `return_date: Some(None)` reopens the loan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordEdit {
    pub book_name: Option<String>,
    pub author: Option<String>,
    pub book_no: Option<String>,
    pub issue_date: Option<String>,
    pub return_date: Option<Option<String>>,
    pub semester: Option<String>,
    pub phone_no: Option<String>,
}

impl RecordEdit {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Update row for the changed columns. Touching `return_date` always
    /// writes the matching status too.
    pub fn to_update_row(&self) -> Result<Row> {
        let mut row = Row::new();
        for (column, value) in [
            ("book_name", &self.book_name),
            ("author", &self.author),
            ("book_no", &self.book_no),
        ] {
            if let Some(value) = value {
                let value = value.trim();
                if value.is_empty() {
                    return Err(BookdeskError::validation(format!("{column} cannot be blank")));
                }
                row.insert(column.to_string(), value.into());
            }
        }
        if let Some(date) = &self.issue_date {
            row.insert(
                "issue_date".to_string(),
                format_date(parse_date("issue_date", date)?).into(),
            );
        }
        for (column, value) in [("semester", &self.semester), ("phone_no", &self.phone_no)] {
            if let Some(value) = value {
                row.insert(column.to_string(), non_blank(Some(value.clone())).into());
            }
        }
        if let Some(return_date) = &self.return_date {
            let normalized = match return_date {
                Some(date) => Some(format_date(parse_date("return_date", date)?)),
                None => None,
            };
            let status = IssueStatus::for_return_date(normalized.as_deref());
            row.insert("return_date".to_string(), normalized.into());
            row.insert("status".to_string(), status.as_str().into());
        }
        Ok(row)
    }

    /// Applies the edit to an in-memory record.
    pub fn apply(&self, record: &mut BookIssueRecord) -> Result<()> {
        let row = self.to_update_row()?;
        let mut value = serde_json::to_value(&*record)
            .map_err(|e| BookdeskError::internal(format!("Failed to serialize record: {e}")))?;
        if let serde_json::Value::Object(map) = &mut value {
            map.extend(row);
        }
        *record = serde_json::from_value(value)
            .map_err(|e| BookdeskError::internal(format!("Failed to apply edit: {e}")))?;
        Ok(())
    }
}
