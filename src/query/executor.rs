//! Query execution and response normalization.
//!
//! The builder never surfaces transport failures as `Err`: every outcome is
//! folded into a [`Response`] carrying either `data` or an `error` string.

use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::builder::{Operation, QueryBuilder};
use crate::db::{Row, SqlTransport};
use crate::error::{BookdeskError, Result};

/// Entry point for building queries against a transport.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn SqlTransport>,
}

impl Client {
    pub fn new(transport: Arc<dyn SqlTransport>) -> Self {
        Self { transport }
    }

    /// Starts a builder for `table`.
    pub fn from(&self, table: &str) -> QueryBuilder {
        QueryBuilder::new(table)
    }

    pub fn transport(&self) -> &Arc<dyn SqlTransport> {
        &self.transport
    }
}

/// Payload of a successful response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Data {
    Rows(Vec<Row>),
    Single(Row),
}

/// `{data, error}` result of one builder execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub data: Option<Data>,
    pub error: Option<String>,
}

impl Response {
    pub fn ok(data: Option<Data>) -> Self {
        Self { data, error: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Converts the error string back into a [`BookdeskError::Query`].
    pub fn into_result(self) -> Result<Option<Data>> {
        match self.error {
            Some(message) => Err(BookdeskError::query(message)),
            None => Ok(self.data),
        }
    }

    /// Rows of a successful response. A single row becomes a one-element list.
    pub fn rows(self) -> Result<Vec<Row>> {
        Ok(match self.into_result()? {
            Some(Data::Rows(rows)) => rows,
            Some(Data::Single(row)) => vec![row],
            None => Vec::new(),
        })
    }

    /// Deserializes every row into `T`.
    pub fn into_rows<T: DeserializeOwned>(self) -> Result<Vec<T>> {
        self.rows()?
            .into_iter()
            .map(|row| {
                serde_json::from_value(serde_json::Value::Object(row))
                    .map_err(|e| BookdeskError::internal(format!("Unexpected row shape: {e}")))
            })
            .collect()
    }

    /// Deserializes the single row into `T`.
    pub fn into_single<T: DeserializeOwned>(self) -> Result<T> {
        let row = match self.into_result()? {
            Some(Data::Single(row)) => row,
            Some(Data::Rows(rows)) => rows
                .into_iter()
                .next()
                .ok_or_else(|| BookdeskError::query("No rows found"))?,
            None => return Err(BookdeskError::query("No rows found")),
        };
        serde_json::from_value(serde_json::Value::Object(row))
            .map_err(|e| BookdeskError::internal(format!("Unexpected row shape: {e}")))
    }
}

/// Shapes transport output the way callers expect it.
///
/// Deletes report no data, `single()` unwraps the first row, everything else
/// is a list.
pub fn normalize(result: Result<Vec<Row>>, operation: &Operation, single: bool) -> Response {
    let rows = match result {
        Ok(rows) => rows,
        Err(e) => return Response::err(e.message()),
    };

    if operation.is_delete() {
        return Response::ok(None);
    }

    if single {
        return match rows.into_iter().next() {
            Some(row) => Response::ok(Some(Data::Single(row))),
            None => Response::err("No rows found"),
        };
    }

    Response::ok(Some(Data::Rows(rows)))
}

impl QueryBuilder {
    /// Compiles and runs the statement with one transport call.
    pub async fn execute(&self, client: &Client) -> Response {
        let compiled = match self.build() {
            Ok(compiled) => compiled,
            Err(e) => {
                debug!(table = self.table(), "not executing: {}", e.message());
                return Response::err("Empty query");
            }
        };

        let start = Instant::now();
        let result = client
            .transport()
            .execute(&compiled.sql, &compiled.params)
            .await;
        let elapsed = start.elapsed();

        match &result {
            Ok(rows) => debug!(
                table = self.table(),
                rows = rows.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "{}",
                compiled.sql
            ),
            Err(e) => warn!(table = self.table(), "query failed: {}", e.message()),
        }

        normalize(result, self.operation(), self.is_single())
    }
}
