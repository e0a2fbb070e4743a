//! Library domain: students, book issue records, and the desk workflows
//! built on the query builder.

pub mod models;
pub mod schema;
mod service;
pub mod stats;

pub use models::{
    BookIssueRecord, IssueRequest, IssueStatus, RecordEdit, Student, StudentKey, StudentSummary,
};
pub use service::{Library, BOOK_ISSUES, SEARCH_LIMIT, STUDENTS};
pub use stats::{
    books_list_csv, filter_options, group_books, student_ledgers, BooksListKind, DashboardStats,
    StudentBooks, StudentLedger,
};
