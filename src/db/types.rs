//! Wire types shared by the transports and the proxy.
//!
//! Rows travel as JSON objects keyed by column name, with column order
//! preserved.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single result row: column name to JSON value, in select order.
pub type Row = serde_json::Map<String, Value>;

/// Body of `POST /api/sql`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SqlRequest {
    /// Statement text with `$1`-style positional placeholders.
    #[serde(default)]
    pub sql: Option<String>,

    /// Positional parameters. Missing means none.
    #[serde(default)]
    pub params: Vec<Value>,
}

impl SqlRequest {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: Some(sql.into()),
            params,
        }
    }
}

/// Response of `POST /api/sql`: exactly one of `data` / `error` is non-null.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SqlResponse {
    pub data: Option<Vec<Row>>,
    pub error: Option<String>,
}

impl SqlResponse {
    /// Successful response carrying rows.
    pub fn rows(rows: Vec<Row>) -> Self {
        Self {
            data: Some(rows),
            error: None,
        }
    }

    /// Failed response carrying a message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(message.into()),
        }
    }
}
