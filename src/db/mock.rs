//! Recording transport for testing.
//!
//! Captures every statement it receives and replays queued results, so the
//! query builder, library workflows, and proxy can be exercised without a
//! database.

use super::{Row, SqlTransport};
use crate::error::{BookdeskError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One statement as the transport saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// A transport that records statements and returns queued results.
///
/// When the queue is empty every statement succeeds with no rows.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    statements: Mutex<Vec<RecordedStatement>>,
    responses: Mutex<VecDeque<std::result::Result<Vec<Row>, String>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues rows for the next unanswered statement.
    pub fn push_rows(&self, rows: Vec<Row>) {
        self.lock_responses().push_back(Ok(rows));
    }

    /// Queues rows given as JSON objects. Non-object values are skipped.
    pub fn push_json(&self, rows: Vec<Value>) {
        let rows = rows
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.push_rows(rows);
    }

    /// Queues a failure for the next unanswered statement.
    pub fn push_error(&self, message: impl Into<String>) {
        self.lock_responses().push_back(Err(message.into()));
    }

    /// Returns every statement received so far.
    pub fn statements(&self) -> Vec<RecordedStatement> {
        match self.statements.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Returns the most recent statement.
    pub fn last(&self) -> Option<RecordedStatement> {
        self.statements().pop()
    }

    fn lock_responses(
        &self,
    ) -> std::sync::MutexGuard<'_, VecDeque<std::result::Result<Vec<Row>, String>>> {
        match self.responses.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl SqlTransport for RecordingTransport {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        {
            let mut statements = match self.statements.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            statements.push(RecordedStatement {
                sql: sql.to_string(),
                params: params.to_vec(),
            });
        }

        match self.lock_responses().pop_front() {
            Some(Ok(rows)) => Ok(rows),
            Some(Err(message)) => Err(BookdeskError::query(message)),
            None => Ok(Vec::new()),
        }
    }
}
