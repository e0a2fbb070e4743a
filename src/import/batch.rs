//! Batched upserts with per-batch failure accounting.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::db::Row;
use crate::query::{Client, UpsertOptions};

/// Outcome of writing one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub table: String,
    pub total: usize,
    pub written: usize,
    pub failed: usize,
    pub failed_batches: usize,
    pub errors: Vec<String>,
}

impl BatchSummary {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    /// Folds another summary for the same table into this one.
    pub fn merge(&mut self, other: BatchSummary) {
        self.total += other.total;
        self.written += other.written;
        self.failed += other.failed;
        self.failed_batches += other.failed_batches;
        self.errors.extend(other.errors);
    }
}

/// Writes rows in fixed-size upsert batches. A failed batch is logged and
/// counted; the run goes on with the next one.
pub struct BatchWriter<'a> {
    client: &'a Client,
    table: &'a str,
    options: UpsertOptions,
    batch_size: usize,
    retry_rows: bool,
}

impl<'a> BatchWriter<'a> {
    pub fn new(client: &'a Client, table: &'a str, options: UpsertOptions) -> Self {
        Self {
            client,
            table,
            options,
            batch_size: 100,
            retry_rows: false,
        }
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Retry a failed batch one row at a time to isolate bad rows.
    pub fn retry_rows(mut self, retry: bool) -> Self {
        self.retry_rows = retry;
        self
    }

    async fn upsert(&self, rows: Vec<Row>) -> Result<(), String> {
        let response = self
            .client
            .from(self.table)
            .upsert(rows, self.options.clone())
            .execute(self.client)
            .await;
        match response.error {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }

    pub async fn write(&self, rows: Vec<Row>) -> BatchSummary {
        let mut summary = BatchSummary {
            table: self.table.to_string(),
            total: rows.len(),
            ..BatchSummary::default()
        };

        for (index, chunk) in rows.chunks(self.batch_size).enumerate() {
            let batch_no = index + 1;
            match self.upsert(chunk.to_vec()).await {
                Ok(()) => {
                    summary.written += chunk.len();
                    info!(
                        table = self.table,
                        "batch {}: {}/{}", batch_no, summary.written, summary.total
                    );
                }
                Err(message) => {
                    summary.failed_batches += 1;
                    warn!(table = self.table, "error in batch {}: {}", batch_no, message);
                    summary.errors.push(format!("batch {batch_no}: {message}"));

                    if self.retry_rows {
                        self.retry_one_by_one(chunk, &mut summary).await;
                    } else {
                        summary.failed += chunk.len();
                    }
                }
            }
        }

        summary
    }

    async fn retry_one_by_one(&self, chunk: &[Row], summary: &mut BatchSummary) {
        for row in chunk {
            match self.upsert(vec![row.clone()]).await {
                Ok(()) => summary.written += 1,
                Err(message) => {
                    let preview: String = serde_json::Value::Object(row.clone())
                        .to_string()
                        .chars()
                        .take(200)
                        .collect();
                    error!(table = self.table, row = %preview, "row insert failed: {}", message);
                    summary.failed += 1;
                    summary.errors.push(message);
                }
            }
        }
    }
}
