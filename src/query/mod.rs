//! Query builder for bookdesk.
//!
//! Builds parameterized SQL from a fluent description (table, projection,
//! filters, ordering) and normalizes results into `{data, error}` responses.

mod builder;
mod executor;
mod filter;
mod select;

pub use builder::{to_row, to_rows, CompiledQuery, Operation, Order, QueryBuilder, UpsertOptions};
pub use executor::{normalize, Client, Data, Response};
pub use filter::{parse_or_clause, split_or_clauses, CompareOp, Filter, OrClause};
pub use select::{foreign_key_column, join_clause, parse_select, Projection, Relation};
