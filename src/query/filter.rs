//! WHERE clause descriptors and the PostgREST-style `or` parser.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::select::cached;
use crate::error::Result;

static CLAUSE_START: OnceLock<Regex> = OnceLock::new();
static IDENTIFIER: OnceLock<Regex> = OnceLock::new();

/// One filter added to a builder. Filters are ANDed together.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { column: String, value: Value },
    Neq { column: String, value: Value },
    Ilike { column: String, pattern: String },
    In { column: String, values: Vec<Value> },
    /// Raw `column.op.value,...` text, parsed at build time.
    Or(String),
}

/// Comparison operators accepted inside an `or` group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Ilike,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "eq" => Some(Self::Eq),
            "neq" => Some(Self::Neq),
            "ilike" => Some(Self::Ilike),
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            _ => None,
        }
    }

    fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Ilike => "ILIKE",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

/// A single parsed `or` clause.
#[derive(Debug, Clone, PartialEq)]
pub enum OrClause {
    Compare {
        column: String,
        op: CompareOp,
        value: String,
    },
    IsNull(String),
    IsNotNull(String),
    In {
        column: String,
        values: Vec<String>,
    },
}

/// Splits an `or` string at commas that begin a new `word.op.` clause.
///
/// Commas inside values (`name.ilike.%Smith, J%`) stay where they are.
pub fn split_or_clauses(conditions: &str) -> Result<Vec<&str>> {
    let clause_start = cached(
        &CLAUSE_START,
        r"^\w+\.(?:eq|neq|ilike|in|is|gt|gte|lt|lte)\.",
    )?;

    let mut parts = Vec::new();
    let mut start = 0;
    for (idx, ch) in conditions.char_indices() {
        if ch == ',' && clause_start.is_match(&conditions[idx + 1..]) {
            parts.push(&conditions[start..idx]);
            start = idx + 1;
        }
    }
    parts.push(&conditions[start..]);
    Ok(parts)
}

/// Parses one clause. Anything unrecognised yields `None` and is dropped.
pub fn parse_or_clause(part: &str) -> Result<Option<OrClause>> {
    let identifier = cached(&IDENTIFIER, r"^[A-Za-z_][A-Za-z0-9_]*$")?;

    let Some((column, rest)) = part.split_once('.') else {
        return Ok(None);
    };
    let Some((op, value)) = rest.split_once('.') else {
        return Ok(None);
    };

    let column = column.trim();
    if !identifier.is_match(column) {
        return Ok(None);
    }
    let op = op.trim().to_lowercase();
    let value = value.trim();

    let clause = match op.as_str() {
        "is" => match value {
            "null" => Some(OrClause::IsNull(column.to_string())),
            "notnull" => Some(OrClause::IsNotNull(column.to_string())),
            _ => None,
        },
        "in" => Some(OrClause::In {
            column: column.to_string(),
            values: parse_in_list(value),
        }),
        other => CompareOp::parse(other).map(|op| OrClause::Compare {
            column: column.to_string(),
            op,
            value: value.to_string(),
        }),
    };
    Ok(clause)
}

/// `(a, "b c")` to `["a", "b c"]`.
fn parse_in_list(value: &str) -> Vec<String> {
    let inner = value
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .unwrap_or(value);
    inner
        .split(',')
        .map(|v| v.trim().trim_matches('"'))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Appends a parameter and returns its placeholder.
pub(crate) fn bind(params: &mut Vec<Value>, value: Value) -> String {
    params.push(value);
    format!("${}", params.len())
}

fn render_in(alias: &str, column: &str, values: Vec<Value>, params: &mut Vec<Value>) -> String {
    if values.is_empty() {
        return "FALSE".to_string();
    }
    let placeholders: Vec<String> = values.into_iter().map(|v| bind(params, v)).collect();
    format!("{alias}.{column} IN ({})", placeholders.join(", "))
}

fn render_or(alias: &str, conditions: &str, params: &mut Vec<Value>) -> Result<Option<String>> {
    let mut rendered = Vec::new();
    for part in split_or_clauses(conditions)? {
        let Some(clause) = parse_or_clause(part)? else {
            continue;
        };
        rendered.push(match clause {
            OrClause::IsNull(column) => format!("{alias}.{column} IS NULL"),
            OrClause::IsNotNull(column) => format!("{alias}.{column} IS NOT NULL"),
            OrClause::Compare { column, op, value } => {
                let ph = bind(params, Value::String(value));
                format!("{alias}.{column} {} {ph}", op.as_sql())
            }
            OrClause::In { column, values } => render_in(
                alias,
                &column,
                values.into_iter().map(Value::String).collect(),
                params,
            ),
        });
    }

    if rendered.is_empty() {
        Ok(None)
    } else {
        Ok(Some(format!("({})", rendered.join(" OR "))))
    }
}

/// Renders `WHERE ...` for the given filters, or an empty string.
pub(crate) fn render_where(
    filters: &[Filter],
    alias: &str,
    params: &mut Vec<Value>,
) -> Result<String> {
    let mut conditions = Vec::with_capacity(filters.len());
    for filter in filters {
        let condition = match filter {
            Filter::Eq { column, value } => {
                Some(format!("{alias}.{column} = {}", bind(params, value.clone())))
            }
            Filter::Neq { column, value } => {
                Some(format!("{alias}.{column} != {}", bind(params, value.clone())))
            }
            Filter::Ilike { column, pattern } => Some(format!(
                "{alias}.{column} ILIKE {}",
                bind(params, Value::String(pattern.clone()))
            )),
            Filter::In { column, values } => {
                Some(render_in(alias, column, values.clone(), params))
            }
            Filter::Or(conditions) => render_or(alias, conditions, params)?,
        };
        conditions.extend(condition);
    }

    if conditions.is_empty() {
        Ok(String::new())
    } else {
        Ok(format!("WHERE {}", conditions.join(" AND ")))
    }
}
