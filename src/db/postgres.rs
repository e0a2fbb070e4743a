//! PostgreSQL transport.
//!
//! Provides the `PostgresTransport` struct that implements the `SqlTransport`
//! trait for PostgreSQL databases using sqlx.

use crate::config::{ConnectionConfig, DatabaseConfig};
use crate::db::{Row, SqlTransport};
use crate::error::{BookdeskError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde_json::{Number, Value};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow, PgTypeInfo};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{Column, Either, Executor, Postgres, Row as SqlxRow, Statement, TypeInfo};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// PostgreSQL transport backed by a connection pool.
#[derive(Debug)]
pub struct PostgresTransport {
    pool: PgPool,
    query_timeout: Duration,
}

impl PostgresTransport {
    /// Creates a transport from an existing connection pool.
    pub fn from_pool(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    /// Connects with retries on transient failures.
    pub async fn connect(config: &ConnectionConfig, settings: &DatabaseConfig) -> Result<Self> {
        let conn_str = config.to_connection_string()?;

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = PgPoolOptions::new()
                .max_connections(settings.max_connections)
                .acquire_timeout(Duration::from_secs(10))
                .connect(&conn_str)
                .await;

            match result {
                Ok(pool) => {
                    debug!("Connected to {}", config.display_string());
                    return Ok(Self::from_pool(
                        pool,
                        Duration::from_secs(settings.query_timeout_secs),
                    ));
                }
                Err(e) => {
                    let is_transient = is_transient_error(&e);
                    last_error = Some(e);

                    if attempt < MAX_RETRY_ATTEMPTS && is_transient {
                        warn!(
                            "Connection attempt {} failed (transient error), retrying in {:?}",
                            attempt, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    } else {
                        break;
                    }
                }
            }
        }

        match last_error {
            Some(e) => Err(map_connection_error(e, config)),
            None => Err(BookdeskError::connection("no connection attempt was made")),
        }
    }

    /// Runs a multi-statement script (schema setup). Not subject to the
    /// proxy whitelist.
    pub async fn execute_script(&self, script: &str) -> Result<()> {
        sqlx::raw_sql(script)
            .execute(&self.pool)
            .await
            .map_err(|e| BookdeskError::query(format_query_error(e)))?;
        Ok(())
    }

    async fn run(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| BookdeskError::connection(e.to_string()))?;

        // Prepare first so the server infers each placeholder's type; the
        // statement is cached on this connection and reused by fetch_all.
        let statement = (&mut *conn)
            .prepare(sql)
            .await
            .map_err(|e| BookdeskError::query(format_query_error(e)))?;

        let types: Vec<PgTypeInfo> = match statement.parameters() {
            Some(Either::Left(types)) => types.to_vec(),
            Some(Either::Right(count)) => vec![PgTypeInfo::with_name("text"); count],
            None => Vec::new(),
        };

        if types.len() != params.len() {
            return Err(BookdeskError::query(format!(
                "statement expects {} parameter(s), got {}",
                types.len(),
                params.len()
            )));
        }

        let mut query = statement.query();
        for (index, (value, ty)) in params.iter().zip(&types).enumerate() {
            query = bind_json(query, index + 1, value, ty)?;
        }

        let rows = query
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| BookdeskError::query(format_query_error(e)))?;

        Ok(rows.iter().map(convert_row).collect())
    }
}

#[async_trait]
impl SqlTransport for PostgresTransport {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        debug!(params = params.len(), "executing: {}", sql);

        tokio::time::timeout(self.query_timeout, self.run(sql, params))
            .await
            .map_err(|_| {
                BookdeskError::query(format!(
                    "Query timed out after {} seconds",
                    self.query_timeout.as_secs()
                ))
            })?
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Binds one JSON parameter using the type the server inferred for it.
fn bind_json<'q>(
    query: PgQuery<'q>,
    position: usize,
    value: &Value,
    ty: &PgTypeInfo,
) -> Result<PgQuery<'q>> {
    let type_name = ty.name().to_uppercase();
    let mismatch = |expected: &str| {
        BookdeskError::query(format!(
            "parameter ${position}: expected {expected}, got {value}"
        ))
    };

    let bound = match type_name.as_str() {
        "BOOL" => query.bind(json_bool(value).map_err(|_| mismatch("boolean"))?),
        "INT2" => {
            let v = json_i64(value).map_err(|_| mismatch("smallint"))?;
            let v = v
                .map(i16::try_from)
                .transpose()
                .map_err(|_| mismatch("smallint"))?;
            query.bind(v)
        }
        "INT4" => {
            let v = json_i64(value).map_err(|_| mismatch("integer"))?;
            let v = v
                .map(i32::try_from)
                .transpose()
                .map_err(|_| mismatch("integer"))?;
            query.bind(v)
        }
        "INT8" => query.bind(json_i64(value).map_err(|_| mismatch("bigint"))?),
        "FLOAT4" => {
            let v = json_f64(value).map_err(|_| mismatch("real"))?;
            query.bind(v.map(|f| f as f32))
        }
        "FLOAT8" => query.bind(json_f64(value).map_err(|_| mismatch("double precision"))?),
        "UUID" => {
            let v = json_text(value)
                .map(|s| s.parse::<Uuid>())
                .transpose()
                .map_err(|_| mismatch("uuid"))?;
            query.bind(v)
        }
        "DATE" => query.bind(
            json_text(value)
                .map(|s| parse_date(&s))
                .transpose()
                .map_err(|_| mismatch("date"))?,
        ),
        "TIMESTAMP" => query.bind(
            json_text(value)
                .map(|s| parse_naive_timestamp(&s))
                .transpose()
                .map_err(|_| mismatch("timestamp"))?,
        ),
        "TIMESTAMPTZ" => query.bind(
            json_text(value)
                .map(|s| parse_timestamptz(&s))
                .transpose()
                .map_err(|_| mismatch("timestamptz"))?,
        ),
        "JSON" | "JSONB" => {
            let v = if value.is_null() {
                None
            } else {
                Some(Json(value.clone()))
            };
            query.bind(v)
        }
        // text, varchar, bpchar, name and anything else text-encoded
        _ => query.bind(json_text(value)),
    };

    Ok(bound)
}

fn json_bool(value: &Value) -> std::result::Result<Option<bool>, ()> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Ok(Some(true)),
            "false" | "f" | "0" | "no" => Ok(Some(false)),
            _ => Err(()),
        },
        _ => Err(()),
    }
}

fn json_i64(value: &Value) -> std::result::Result<Option<i64>, ()> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_i64().map(Some).ok_or(()),
        Value::String(s) => s.trim().parse().map(Some).map_err(|_| ()),
        _ => Err(()),
    }
}

fn json_f64(value: &Value) -> std::result::Result<Option<f64>, ()> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_f64().map(Some).ok_or(()),
        Value::String(s) => s.trim().parse().map(Some).map_err(|_| ()),
        _ => Err(()),
    }
}

/// Text form of a parameter; non-string scalars are stringified.
fn json_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn parse_date(s: &str) -> std::result::Result<NaiveDate, ()> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| parse_timestamptz(s).map(|dt| dt.date_naive()))
        .map_err(|_| ())
}

fn parse_naive_timestamp(s: &str) -> std::result::Result<NaiveDateTime, ()> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| DateTime::parse_from_rfc3339(s).map(|dt| dt.naive_utc()))
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d").map(|d| d.and_time(NaiveTime::default())))
        .map_err(|_| ())
}

fn parse_timestamptz(s: &str) -> std::result::Result<DateTime<Utc>, ()> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z").map(|dt| dt.with_timezone(&Utc))
        })
        .or_else(|_| parse_naive_timestamp(s).map(|naive| naive.and_utc()))
        .map_err(|_| ())
}

/// Converts a sqlx PgRow to a JSON row.
fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| {
            (
                col.name().to_string(),
                convert_value(row, i, col.type_info().name()),
            )
        })
        .collect()
}

/// Converts a single column value from a PgRow to JSON.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    match type_name.to_uppercase().as_str() {
        "BOOL" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),

        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::from(v as i64))
            .unwrap_or(Value::Null),

        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::from(v as i64))
            .unwrap_or(Value::Null),

        "INT8" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(Value::from)
            .unwrap_or(Value::Null),

        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .and_then(|v| Number::from_f64(v as f64))
            .map(Value::Number)
            .unwrap_or(Value::Null),

        "FLOAT8" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),

        "UUID" => row
            .try_get::<Option<Uuid>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),

        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null),

        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
            .unwrap_or(Value::Null),

        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
            .unwrap_or(Value::Null),

        "JSON" | "JSONB" => row
            .try_get::<Option<Json<Value>>, _>(index)
            .ok()
            .flatten()
            .map(|v| v.0)
            .unwrap_or(Value::Null),

        // Text-like types, plus enums and other text-encoded values
        _ => row
            .try_get::<Option<String>, _>(index)
            .or_else(|_| row.try_get_unchecked::<Option<String>, _>(index))
            .ok()
            .flatten()
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
        || error_str.contains("does not exist")
    {
        return false;
    }

    error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
}

/// Maps sqlx connection errors to user-friendly messages.
fn map_connection_error(error: sqlx::Error, config: &ConnectionConfig) -> BookdeskError {
    let host = config.host.as_deref().unwrap_or("localhost");
    let port = config.port;
    let user = config.user.as_deref().unwrap_or("unknown");
    let database = config.database.as_deref().unwrap_or("unknown");

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        BookdeskError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running."
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        BookdeskError::connection(format!(
            "Authentication failed for user '{user}'. Check your credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        BookdeskError::connection(format!("Database '{database}' does not exist."))
    } else if error_str.contains("ssl") || error_str.contains("tls") {
        BookdeskError::connection(
            "Server requires SSL. Add '?sslmode=require' to the connection string.".to_string(),
        )
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        BookdeskError::connection(format!(
            "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        BookdeskError::connection(error.to_string())
    }
}

/// Formats a query error with the server's detail lines.
fn format_query_error(error: sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = String::from(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }
        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }
        if let Some(constraint) = pg_error.constraint() {
            result.push_str("\n  CONSTRAINT: ");
            result.push_str(constraint);
        }
    }

    result
}
