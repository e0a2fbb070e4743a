//! Parse-based statement admission.
//!
//! Uses sqlparser-rs with the PostgreSQL dialect. A request must hold
//! exactly one statement, and that statement (including any data-modifying
//! CTEs or subqueries) must only select, insert, update or delete.

use sqlparser::ast::{Query, Select, SetExpr, Statement, TableFactor, TableWithJoins};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::error::{BookdeskError, Result};

use super::{StatementKind, NOT_ALLOWED};

/// Checker used by the proxy in strict mode.
#[derive(Debug)]
pub struct StrictChecker {
    dialect: PostgreSqlDialect,
}

impl Default for StrictChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl StrictChecker {
    pub fn new() -> Self {
        Self {
            dialect: PostgreSqlDialect {},
        }
    }

    /// Parses `sql` and returns the strongest statement kind it contains.
    pub fn check(&self, sql: &str) -> Result<StatementKind> {
        let statements = Parser::parse_sql(&self.dialect, sql)
            .map_err(|e| BookdeskError::rejected(format!("Could not parse SQL: {e}")))?;

        match statements.as_slice() {
            [] => Err(BookdeskError::rejected("SQL query is required")),
            [statement] => {
                classify_statement(statement).ok_or_else(|| BookdeskError::rejected(NOT_ALLOWED))
            }
            _ => Err(BookdeskError::rejected("Only one statement per request")),
        }
    }
}

/// Keeps the more invasive of two kinds. `None` (not allowed) wins.
fn strongest(a: Option<StatementKind>, b: Option<StatementKind>) -> Option<StatementKind> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        _ => None,
    }
}

fn classify_statement(statement: &Statement) -> Option<StatementKind> {
    match statement {
        Statement::Query(query) => classify_query(query),
        Statement::Insert(_) => Some(StatementKind::Insert),
        Statement::Update { .. } => Some(StatementKind::Update),
        Statement::Delete(_) => Some(StatementKind::Delete),
        _ => None,
    }
}

/// Walks CTEs and the body, since `WITH x AS (DELETE ...) SELECT` is a delete.
fn classify_query(query: &Query) -> Option<StatementKind> {
    let mut kind = Some(StatementKind::Select);
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            kind = strongest(kind, classify_query(&cte.query));
        }
    }
    strongest(kind, classify_set_expr(&query.body))
}

fn classify_set_expr(set_expr: &SetExpr) -> Option<StatementKind> {
    match set_expr {
        SetExpr::Delete(stmt) | SetExpr::Update(stmt) | SetExpr::Insert(stmt) => {
            classify_statement(stmt)
        }
        SetExpr::Merge(_) => None,
        SetExpr::Query(query) => classify_query(query),
        SetExpr::Select(select) => classify_select(select),
        SetExpr::SetOperation { left, right, .. } => {
            strongest(classify_set_expr(left), classify_set_expr(right))
        }
        SetExpr::Values(_) | SetExpr::Table(_) => Some(StatementKind::Select),
    }
}

fn classify_select(select: &Select) -> Option<StatementKind> {
    select
        .from
        .iter()
        .fold(Some(StatementKind::Select), |kind, twj| {
            strongest(kind, classify_table_with_joins(twj))
        })
}

fn classify_table_with_joins(twj: &TableWithJoins) -> Option<StatementKind> {
    twj.joins.iter().fold(classify_table_factor(&twj.relation), |kind, join| {
        strongest(kind, classify_table_factor(&join.relation))
    })
}

fn classify_table_factor(factor: &TableFactor) -> Option<StatementKind> {
    match factor {
        TableFactor::Derived { subquery, .. } => classify_query(subquery),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => classify_table_with_joins(table_with_joins),
        _ => Some(StatementKind::Select),
    }
}
