//! Bulk data scripts: CSV student import, in/out normalization, and
//! database-to-database migration.
//!
//! Every writer here is additive. Rows are upserted in batches and a failed
//! batch never aborts the run; it is logged and counted in the summary.

mod batch;
mod migrate;
mod status;
mod students;

pub use batch::{BatchSummary, BatchWriter};
pub use migrate::{migrate, MigrationReport, TableCount, PAGE_SIZE};
pub use status::{normalize_status, StatusCounts, StatusReport};
pub use students::{
    import_students, parse_students, ParsedStudents, StudentImport, STUDENT_CONFLICT, STUDENT_KEY,
};

use crate::db::Row;
use crate::error::Result;
use crate::query::Client;

/// Reads a whole table page by page.
///
/// `key` must identify a row uniquely: OFFSET paging over tied sort values
/// skips some rows and repeats others.
pub async fn fetch_all(
    client: &Client,
    table: &str,
    columns: &str,
    key: &[&str],
    page_size: u64,
) -> Result<Vec<Row>> {
    let page_size = page_size.max(1);
    let mut rows = Vec::new();
    let mut from = 0;

    loop {
        let query = key
            .iter()
            .fold(client.from(table).select(columns), |q, column| q.order_asc(column));
        let page = query
            .range(from, from + page_size - 1)
            .execute(client)
            .await
            .rows()?;
        let fetched = page.len() as u64;
        rows.extend(page);
        tracing::debug!(table, fetched = rows.len(), "page read");

        if fetched < page_size {
            break;
        }
        from += page_size;
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RecordingTransport;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fetch_all_pages_until_short_page() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_json(vec![json!({"id": 1}), json!({"id": 2})]);
        transport.push_json(vec![json!({"id": 3})]);
        let client = Client::new(transport.clone());

        let rows = fetch_all(&client, "staff", "*", &["staff_id"], 2).await.unwrap();
        assert_eq!(rows.len(), 3);

        let statements = transport.statements();
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[0].sql,
            "SELECT staff.* FROM staff ORDER BY staff.staff_id ASC LIMIT 2 OFFSET 0"
        );
        assert!(statements[1].sql.ends_with("LIMIT 2 OFFSET 2"));
    }

    #[tokio::test]
    async fn test_fetch_all_orders_by_every_key_column() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_json(vec![]);
        let client = Client::new(transport.clone());

        fetch_all(&client, "students", "reg_no, course", &["reg_no", "course"], 100)
            .await
            .unwrap();
        assert_eq!(
            transport.statements()[0].sql,
            "SELECT students.reg_no, students.course FROM students \
             ORDER BY students.reg_no ASC, students.course ASC LIMIT 100 OFFSET 0"
        );
    }

    #[tokio::test]
    async fn test_fetch_all_propagates_error() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_error("relation \"staff\" does not exist");
        let client = Client::new(transport);
        assert!(fetch_all(&client, "staff", "*", &["staff_id"], 10).await.is_err());
    }
}
