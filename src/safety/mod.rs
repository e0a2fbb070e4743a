//! Statement admission for the SQL proxy.
//!
//! The default check looks only at the leading keyword. Strict mode parses
//! the statement as well (see [`StrictChecker`]).

mod parser;

pub use parser::StrictChecker;

use std::fmt;

use crate::error::{BookdeskError, Result};

/// Rejection message for anything outside the whitelist.
pub const NOT_ALLOWED: &str = "Only SELECT/INSERT/UPDATE/DELETE allowed";

/// Statement kinds the proxy will run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

impl StatementKind {
    pub const ALL: [StatementKind; 4] = [Self::Select, Self::Insert, Self::Update, Self::Delete];

    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// True for statements that change data.
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Select)
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Admits a statement whose trimmed, upper-cased text starts with an
/// allowed keyword.
///
/// This is a prefix test, not a parse: `SELECT 1; DROP TABLE x` passes.
pub fn check_statement(sql: &str) -> Result<StatementKind> {
    let normalized = sql.trim().to_uppercase();
    StatementKind::ALL
        .into_iter()
        .find(|kind| normalized.starts_with(kind.keyword()))
        .ok_or_else(|| BookdeskError::rejected(NOT_ALLOWED))
}
