//! Desk workflows: search, issue, return, edit, delete, and reporting.

use chrono::NaiveDate;
use tracing::{info, warn};

use super::models::{
    format_date, BookIssueRecord, IssueRequest, IssueStatus, RecordEdit, Student, StudentKey,
};
use super::stats::{
    filter_groups, group_books, student_ledgers, BooksListKind, DashboardStats, StudentBooks,
    StudentLedger,
};
use crate::db::Row;
use crate::error::{BookdeskError, Result};
use crate::query::{to_rows, Client, Order, QueryBuilder};

pub const STUDENTS: &str = "students";
pub const BOOK_ISSUES: &str = "book_issues";

/// Default number of search hits.
pub const SEARCH_LIMIT: u64 = 10;

/// Projection used wherever records are listed with their student.
const RECORD_WITH_STUDENT: &str = "*, students(name, reg_no, course, year, in_out)";

/// Sentinel id that no record has; deleting everything else clears the table.
const NIL_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Library operations over a query [`Client`].
#[derive(Clone)]
pub struct Library {
    client: Client,
}

/// Restricts a record query to one student. Records written without a
/// course still match on register number.
fn for_student(query: QueryBuilder, key: &StudentKey) -> QueryBuilder {
    query.eq("student_reg_no", key.reg_no.as_str()).or(&format!(
        "student_course.eq.{},student_course.is.null",
        key.course
    ))
}

impl Library {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Case-insensitive match on name, father's name, or register number.
    pub async fn search_students(&self, term: &str, limit: u64) -> Result<Vec<Student>> {
        let term = term.trim();
        if term.is_empty() {
            return Err(BookdeskError::validation("Please enter a search term"));
        }
        // A comma would start a new `or()` clause.
        let term: String = term
            .chars()
            .map(|c| if matches!(c, ',' | '(' | ')') { ' ' } else { c })
            .collect();
        let pattern = format!("%{}%", term.trim());
        self.client
            .from(STUDENTS)
            .select("*")
            .or(&format!(
                "name.ilike.{pattern},father.ilike.{pattern},reg_no.ilike.{pattern}"
            ))
            .order_asc("name")
            .limit(limit)
            .execute(&self.client)
            .await
            .into_rows()
    }

    pub async fn find_student(&self, key: &StudentKey) -> Result<Student> {
        self.client
            .from(STUDENTS)
            .select("*")
            .eq("reg_no", key.reg_no.as_str())
            .eq("course", key.course.as_str())
            .single()
            .execute(&self.client)
            .await
            .into_single()
    }

    pub async fn student_stats(&self, key: &StudentKey) -> Result<StudentLedger> {
        let query = self.client.from(BOOK_ISSUES).select("id, status, return_date");
        let rows = for_student(query, key).execute(&self.client).await.rows()?;

        let mut ledger = StudentLedger {
            student: Some(key.clone()),
            ..StudentLedger::default()
        };
        for row in rows {
            ledger.issued += 1;
            match row.get("status").and_then(|v| v.as_str()) {
                Some("returned") => ledger.returned += 1,
                _ => ledger.pending += 1,
            }
        }
        Ok(ledger)
    }

    /// Issues every book in `requests` to `student` with one insert.
    pub async fn issue_books(
        &self,
        student: &StudentKey,
        requests: Vec<IssueRequest>,
    ) -> Result<Vec<BookIssueRecord>> {
        if requests.is_empty() {
            return Err(BookdeskError::validation("Please add at least one book"));
        }
        let records = requests
            .into_iter()
            .map(|r| r.into_record(student))
            .collect::<Result<Vec<_>>>()?;

        let issued: Vec<BookIssueRecord> = self
            .client
            .from(BOOK_ISSUES)
            .insert(to_rows(&records)?)
            .execute(&self.client)
            .await
            .into_rows()?;
        info!(student = %student, count = issued.len(), "issued books");
        Ok(issued)
    }

    /// Books still out for `student`, newest first.
    pub async fn pending_books(&self, key: &StudentKey) -> Result<Vec<BookIssueRecord>> {
        let query = self
            .client
            .from(BOOK_ISSUES)
            .select("*")
            .eq("status", IssueStatus::Issued.as_str());
        for_student(query, key)
            .order("issue_date", Order::ascending(false))
            .execute(&self.client)
            .await
            .into_rows()
    }

    /// Marks the given records returned on `date`.
    pub async fn return_books(
        &self,
        ids: &[String],
        date: NaiveDate,
    ) -> Result<Vec<BookIssueRecord>> {
        if ids.is_empty() {
            return Err(BookdeskError::validation(
                "Please select at least one book to return",
            ));
        }
        let mut fields = Row::new();
        fields.insert("return_date".to_string(), format_date(date).into());
        fields.insert("status".to_string(), IssueStatus::Returned.as_str().into());

        let returned: Vec<BookIssueRecord> = self
            .client
            .from(BOOK_ISSUES)
            .update(fields)
            .in_("id", ids.iter().map(String::as_str))
            .execute(&self.client)
            .await
            .into_rows()?;
        if returned.len() != ids.len() {
            warn!(
                requested = ids.len(),
                updated = returned.len(),
                "some records were not found"
            );
        }
        Ok(returned)
    }

    pub async fn edit_record(&self, id: &str, edit: &RecordEdit) -> Result<BookIssueRecord> {
        let fields = edit.to_update_row()?;
        if fields.is_empty() {
            return Err(BookdeskError::validation("Nothing to update"));
        }
        self.client
            .from(BOOK_ISSUES)
            .update(fields)
            .eq("id", id)
            .single()
            .execute(&self.client)
            .await
            .into_single()
    }

    pub async fn delete_record(&self, id: &str) -> Result<()> {
        self.client
            .from(BOOK_ISSUES)
            .delete()
            .eq("id", id)
            .execute(&self.client)
            .await
            .into_result()
            .map(|_| ())
    }

    /// Deletes every issue record. Students are left alone.
    pub async fn clear_all_books(&self) -> Result<()> {
        self.client
            .from(BOOK_ISSUES)
            .delete()
            .neq("id", NIL_ID)
            .execute(&self.client)
            .await
            .into_result()?;
        warn!("all book issue records deleted");
        Ok(())
    }

    /// Every record with its embedded student.
    pub async fn all_records(&self) -> Result<Vec<BookIssueRecord>> {
        self.client
            .from(BOOK_ISSUES)
            .select(RECORD_WITH_STUDENT)
            .execute(&self.client)
            .await
            .into_rows()
    }

    pub async fn all_students(&self) -> Result<Vec<Student>> {
        self.client
            .from(STUDENTS)
            .select("*")
            .order_asc("reg_no")
            .execute(&self.client)
            .await
            .into_rows()
    }

    pub async fn dashboard(&self) -> Result<DashboardStats> {
        let records = self.all_records().await?;
        let students = self.all_students().await?;
        Ok(DashboardStats::compute(&records, &students))
    }

    /// Ledgers of students with at least one book still out.
    pub async fn pending_ledgers(&self) -> Result<Vec<StudentLedger>> {
        let records = self.all_records().await?;
        Ok(student_ledgers(&records)
            .into_iter()
            .filter(|ledger| ledger.pending > 0)
            .collect())
    }

    /// Students with their books for one list, optionally filtered.
    pub async fn books_list(
        &self,
        kind: BooksListKind,
        year: Option<&str>,
        course: Option<&str>,
    ) -> Result<Vec<StudentBooks>> {
        let records = self.all_records().await?;
        Ok(filter_groups(group_books(&records, kind), year, course))
    }
}
