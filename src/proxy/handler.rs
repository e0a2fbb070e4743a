//! Request handlers for the SQL proxy.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use super::AppState;
use crate::db::SqlResponse;
use crate::safety::check_statement;

pub(crate) fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(SqlResponse::error(message))).into_response()
}

/// Pulls `sql` and `params` out of a decoded body.
///
/// `sql` must be a non-blank string; `params` may be absent or null.
fn extract_request(body: &Value) -> Result<(String, Vec<Value>), &'static str> {
    let sql = match body.get("sql") {
        Some(Value::String(sql)) if !sql.trim().is_empty() => sql.clone(),
        _ => return Err("SQL query is required"),
    };
    let params = match body.get("params") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(_) => return Err("params must be an array"),
    };
    Ok((sql, params))
}

/// `POST /api/sql`
pub async fn api_sql(State(state): State<AppState>, body: Bytes) -> Response {
    let body: Value = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(_) => return json_error(StatusCode::BAD_REQUEST, "Invalid JSON body"),
    };

    let (sql, params) = match extract_request(&body) {
        Ok(parts) => parts,
        Err(message) => return json_error(StatusCode::BAD_REQUEST, message),
    };

    let mut kind = match check_statement(&sql) {
        Ok(kind) => kind,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, e.message()),
    };
    if let Some(checker) = &state.strict {
        match checker.check(&sql) {
            Ok(parsed) => kind = parsed,
            Err(e) => {
                debug!("strict check refused statement: {}", e.message());
                return json_error(StatusCode::BAD_REQUEST, e.message());
            }
        }
    }

    match state.transport.execute(&sql, &params).await {
        Ok(rows) => {
            if kind.is_write() {
                info!(%kind, rows = rows.len(), "write statement applied");
            }
            (StatusCode::OK, Json(SqlResponse::rows(rows))).into_response()
        }
        Err(e) => {
            error!(query = %sql, params = ?params, "SQL error: {}", e.message());
            json_error(StatusCode::BAD_REQUEST, e.message())
        }
    }
}

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
