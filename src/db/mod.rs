//! Transport layer for bookdesk.
//!
//! Every statement the application runs goes through a [`SqlTransport`]:
//! directly against PostgreSQL, through a remote SQL proxy over HTTP, or
//! through an in-memory recorder in tests.

mod http;
mod mock;
mod postgres;
mod types;

pub use http::HttpTransport;
pub use mock::{RecordedStatement, RecordingTransport};
pub use postgres::PostgresTransport;
pub use types::{Row, SqlRequest, SqlResponse};

use std::sync::Arc;

use crate::config::{ConnectionConfig, DatabaseConfig, RemoteConfig};
use crate::error::{BookdeskError, Result};
use async_trait::async_trait;
use serde_json::Value;
use url::Url;

/// Executes one parameterized statement and returns its rows.
///
/// Statements that return nothing (DELETE without RETURNING) yield an empty vec.
#[async_trait]
pub trait SqlTransport: Send + Sync {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Releases pooled resources.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Where statements should be sent.
#[derive(Debug, Clone)]
pub enum Target {
    /// Direct connection to PostgreSQL.
    Postgres(ConnectionConfig),
    /// A remote `POST /api/sql` endpoint.
    Http { endpoint: Url, api_key: Option<String> },
}

impl Target {
    /// Parses a source argument: `http(s)://` URLs are proxy endpoints,
    /// anything else must be a PostgreSQL connection string.
    pub fn parse(source: &str) -> Result<Self> {
        if source.starts_with("http://") || source.starts_with("https://") {
            let remote = RemoteConfig {
                api_url: source.to_string(),
                api_key: None,
            };
            return Ok(Self::Http {
                endpoint: remote.endpoint()?,
                api_key: None,
            });
        }
        Ok(Self::Postgres(ConnectionConfig::from_connection_string(
            source,
        )?))
    }

    /// Builds an HTTP target from the legacy JSON config.
    pub fn from_remote(remote: &RemoteConfig) -> Result<Self> {
        Ok(Self::Http {
            endpoint: remote.endpoint()?,
            api_key: remote.api_key.clone(),
        })
    }

    /// Display-safe description for logs.
    pub fn display_string(&self) -> String {
        match self {
            Self::Postgres(conn) => conn.display_string(),
            Self::Http { endpoint, .. } => endpoint.to_string(),
        }
    }
}

/// Creates a transport for the given target.
///
/// This is the central factory function for database access.
pub async fn connect(target: &Target, settings: &DatabaseConfig) -> Result<Arc<dyn SqlTransport>> {
    match target {
        Target::Postgres(conn) => {
            let transport = PostgresTransport::connect(conn, settings).await?;
            Ok(Arc::new(transport))
        }
        Target::Http { endpoint, api_key } => {
            let transport = HttpTransport::new(endpoint.clone(), api_key.clone())?;
            Ok(Arc::new(transport))
        }
    }
}

/// Rejects targets that cannot run DDL (schema setup bypasses the proxy).
pub fn require_postgres(target: &Target) -> Result<&ConnectionConfig> {
    match target {
        Target::Postgres(conn) => Ok(conn),
        Target::Http { .. } => Err(BookdeskError::config(
            "This command needs a direct database connection, not a proxy endpoint",
        )),
    }
}
