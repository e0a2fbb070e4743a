//! HTTP transport: sends statements to a remote `POST /api/sql` endpoint.

use crate::db::{Row, SqlRequest, SqlResponse, SqlTransport};
use crate::error::{BookdeskError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Request timeout for remote statements.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Transport that forwards statements to a SQL proxy.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl HttpTransport {
    /// Creates a transport for the given endpoint. The optional key is sent
    /// both as `apikey` and as a bearer token.
    pub fn new(endpoint: Url, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| BookdeskError::connection(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl SqlTransport for HttpTransport {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        debug!(endpoint = %self.endpoint, "posting: {}", sql);

        let body = SqlRequest::new(sql, params.to_vec());
        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key).bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BookdeskError::connection(format!("Request failed: {e}")))?;

        let status = response.status();
        let parsed: Option<SqlResponse> = response.json().await.ok();

        interpret_response(status.is_success(), parsed)
    }
}

/// Maps an HTTP status plus decoded body onto rows or an error message.
fn interpret_response(success: bool, body: Option<SqlResponse>) -> Result<Vec<Row>> {
    match body {
        Some(SqlResponse {
            error: Some(message),
            ..
        }) => Err(BookdeskError::query(message)),
        Some(SqlResponse { data, error: None }) if success => Ok(data.unwrap_or_default()),
        _ => Err(BookdeskError::query("Query failed")),
    }
}
