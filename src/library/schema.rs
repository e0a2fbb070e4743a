//! Table definitions for the library database.

use tracing::info;

use crate::db::PostgresTransport;
use crate::error::Result;

/// Idempotent DDL for every table bookdesk touches.
pub const SCHEMA_SQL: &str = r#"
CREATE EXTENSION IF NOT EXISTS pgcrypto;

CREATE TABLE IF NOT EXISTS students (
    reg_no      TEXT NOT NULL,
    course      TEXT NOT NULL,
    name        TEXT NOT NULL,
    father      TEXT NOT NULL DEFAULT '',
    year        TEXT NOT NULL DEFAULT '',
    in_out      TEXT DEFAULT 'In',
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (reg_no, course)
);

CREATE TABLE IF NOT EXISTS staff (
    staff_id    TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    department  TEXT,
    phone_no    TEXT,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS book_issues (
    id              UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    student_reg_no  TEXT NOT NULL,
    student_course  TEXT,
    book_name       TEXT NOT NULL,
    author          TEXT NOT NULL,
    book_no         TEXT NOT NULL,
    semester        TEXT,
    phone_no        TEXT,
    issue_date      DATE NOT NULL,
    return_date     DATE,
    status          TEXT NOT NULL DEFAULT 'issued',
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT book_issues_student_fk FOREIGN KEY (student_reg_no, student_course)
        REFERENCES students (reg_no, course) ON UPDATE CASCADE,
    CONSTRAINT book_issues_status_matches_return CHECK (
        (status = 'issued' AND return_date IS NULL)
        OR (status = 'returned' AND return_date IS NOT NULL)
    )
);

CREATE INDEX IF NOT EXISTS book_issues_student_idx
    ON book_issues (student_reg_no, student_course);
CREATE INDEX IF NOT EXISTS book_issues_status_idx ON book_issues (status);
"#;

/// Creates the tables if they do not exist.
pub async fn apply(transport: &PostgresTransport) -> Result<()> {
    info!("applying library schema");
    transport.execute_script(SCHEMA_SQL).await
}
