//! Fluent query builder that compiles to one parameterized statement.

use serde::Serialize;
use serde_json::Value;

use super::filter::{bind, render_where, Filter};
use super::select::parse_select;
use crate::db::Row;
use crate::error::{BookdeskError, Result};

/// Sort direction for [`QueryBuilder::order`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order {
    pub ascending: bool,
}

impl Order {
    pub fn ascending(ascending: bool) -> Self {
        Self { ascending }
    }
}

impl Default for Order {
    fn default() -> Self {
        Self { ascending: true }
    }
}

/// Options for [`QueryBuilder::upsert`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertOptions {
    /// Comma-separated conflict target columns. Defaults to `id`.
    pub on_conflict: Option<String>,
    /// Skip conflicting rows instead of updating them.
    pub ignore_duplicates: bool,
}

impl UpsertOptions {
    pub fn on_conflict(columns: impl Into<String>) -> Self {
        Self {
            on_conflict: Some(columns.into()),
            ignore_duplicates: false,
        }
    }

    pub fn ignore_duplicates(mut self) -> Self {
        self.ignore_duplicates = true;
        self
    }

    fn conflict_columns(&self) -> Vec<String> {
        let columns: Vec<String> = self
            .on_conflict
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        if columns.is_empty() {
            vec!["id".to_string()]
        } else {
            columns
        }
    }
}

/// What the statement does.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Select,
    Insert(Vec<Row>),
    Update(Row),
    Delete,
    Upsert(Vec<Row>, UpsertOptions),
}

impl Operation {
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete)
    }
}

/// A statement ready for a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Builder for a single statement against one table.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    table: String,
    operation: Operation,
    projection: String,
    filters: Vec<Filter>,
    order: Vec<(String, Order)>,
    limit: Option<u64>,
    offset: Option<u64>,
    single: bool,
}

impl QueryBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            operation: Operation::Select,
            projection: "*".to_string(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            single: false,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn is_single(&self) -> bool {
        self.single
    }

    /// Sets the projection. Embedded relations use `table(col, ...)`.
    pub fn select(mut self, columns: &str) -> Self {
        self.projection = columns.to_string();
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq {
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn neq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Neq {
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn ilike(mut self, column: &str, pattern: impl Into<String>) -> Self {
        self.filters.push(Filter::Ilike {
            column: column.to_string(),
            pattern: pattern.into(),
        });
        self
    }

    pub fn in_<I, V>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.filters.push(Filter::In {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Adds an OR group such as `name.ilike.%ali%,reg_no.eq.S100`.
    pub fn or(mut self, conditions: &str) -> Self {
        self.filters.push(Filter::Or(conditions.to_string()));
        self
    }

    /// Adds a sort key. Repeated calls sort by each column in turn.
    pub fn order(mut self, column: &str, order: Order) -> Self {
        self.order.push((column.to_string(), order));
        self
    }

    pub fn order_asc(self, column: &str) -> Self {
        self.order(column, Order::default())
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Inclusive row window, zero-based.
    pub fn range(mut self, from: u64, to: u64) -> Self {
        self.offset = Some(from);
        self.limit = Some(to.saturating_sub(from) + 1);
        self
    }

    /// Return exactly one row as an object instead of a list.
    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }

    pub fn insert(mut self, rows: Vec<Row>) -> Self {
        self.operation = Operation::Insert(rows);
        self
    }

    pub fn update(mut self, fields: Row) -> Self {
        self.operation = Operation::Update(fields);
        self
    }

    pub fn delete(mut self) -> Self {
        self.operation = Operation::Delete;
        self
    }

    pub fn upsert(mut self, rows: Vec<Row>, options: UpsertOptions) -> Self {
        self.operation = Operation::Upsert(rows, options);
        self
    }

    /// Compiles the builder into SQL text plus positional parameters.
    pub fn build(&self) -> Result<CompiledQuery> {
        let mut params = Vec::new();
        let t = &self.table;

        let sql = match &self.operation {
            Operation::Select => {
                let (columns, joins) = parse_select(&self.projection)?.render(t);
                let mut sql = format!("SELECT {columns} FROM {t}");
                for join in joins {
                    sql.push(' ');
                    sql.push_str(&join);
                }
                push_clause(&mut sql, &render_where(&self.filters, t, &mut params)?);
                if !self.order.is_empty() {
                    let keys: Vec<String> = self
                        .order
                        .iter()
                        .map(|(column, order)| {
                            let dir = if order.ascending { "ASC" } else { "DESC" };
                            format!("{t}.{column} {dir}")
                        })
                        .collect();
                    sql.push_str(&format!(" ORDER BY {}", keys.join(", ")));
                }
                if let Some(n) = self.limit {
                    sql.push_str(&format!(" LIMIT {n}"));
                }
                if let Some(n) = self.offset {
                    sql.push_str(&format!(" OFFSET {n}"));
                }
                sql
            }
            Operation::Insert(rows) => {
                let (columns, values) = values_clause(rows, &mut params)?;
                format!(
                    "INSERT INTO {t} ({}) VALUES {values} RETURNING *",
                    columns.join(", ")
                )
            }
            Operation::Update(fields) => {
                if fields.is_empty() {
                    return Err(BookdeskError::validation("Empty query"));
                }
                let sets: Vec<String> = fields
                    .iter()
                    .map(|(column, value)| format!("{column} = {}", bind(&mut params, value.clone())))
                    .collect();
                let mut sql = format!("UPDATE {t} SET {}", sets.join(", "));
                push_clause(&mut sql, &render_where(&self.filters, t, &mut params)?);
                sql.push_str(" RETURNING *");
                sql
            }
            Operation::Delete => {
                let mut sql = format!("DELETE FROM {t}");
                push_clause(&mut sql, &render_where(&self.filters, t, &mut params)?);
                sql
            }
            Operation::Upsert(rows, options) => {
                let (columns, values) = values_clause(rows, &mut params)?;
                let conflict = options.conflict_columns();
                let updates: Vec<String> = columns
                    .iter()
                    .filter(|c| !conflict.contains(c))
                    .map(|c| format!("{c} = EXCLUDED.{c}"))
                    .collect();
                let action = if options.ignore_duplicates || updates.is_empty() {
                    "DO NOTHING".to_string()
                } else {
                    format!("DO UPDATE SET {}", updates.join(", "))
                };
                format!(
                    "INSERT INTO {t} ({}) VALUES {values} ON CONFLICT ({}) {action} RETURNING *",
                    columns.join(", "),
                    conflict.join(", ")
                )
            }
        };

        Ok(CompiledQuery { sql, params })
    }
}

fn push_clause(sql: &mut String, clause: &str) {
    if !clause.is_empty() {
        sql.push(' ');
        sql.push_str(clause);
    }
}

/// Column list from the first row plus `($1, $2), ($3, $4)` value tuples.
fn values_clause(rows: &[Row], params: &mut Vec<Value>) -> Result<(Vec<String>, String)> {
    let first = rows
        .first()
        .ok_or_else(|| BookdeskError::validation("Empty query"))?;
    let columns: Vec<String> = first.keys().cloned().collect();
    if columns.is_empty() {
        return Err(BookdeskError::validation("Empty query"));
    }

    let tuples: Vec<String> = rows
        .iter()
        .map(|row| {
            let placeholders: Vec<String> = columns
                .iter()
                .map(|c| bind(params, row.get(c).cloned().unwrap_or(Value::Null)))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();

    Ok((columns, tuples.join(", ")))
}

/// Serializes one value into a row. Fails unless it serializes to an object.
pub fn to_row<T: Serialize>(item: &T) -> Result<Row> {
    match serde_json::to_value(item) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(BookdeskError::internal(format!(
            "Expected an object, got {other}"
        ))),
        Err(e) => Err(BookdeskError::internal(format!("Failed to serialize row: {e}"))),
    }
}

/// Serializes a slice of values into rows.
pub fn to_rows<T: Serialize>(items: &[T]) -> Result<Vec<Row>> {
    items.iter().map(to_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_select_with_relation_filter_order_limit() {
        let q = QueryBuilder::new("book_issues")
            .select("*, students(name, course)")
            .eq("status", "issued")
            .order("issue_date", Order::ascending(false))
            .limit(10)
            .build()
            .unwrap();

        assert_eq!(
            q.sql,
            "SELECT book_issues.*, CASE WHEN book_issues.student_reg_no IS NOT NULL \
             THEN json_build_object('name', students.name, 'course', students.course) END AS students \
             FROM book_issues LEFT JOIN students ON book_issues.student_reg_no = students.reg_no \
             AND book_issues.student_course = students.course \
             WHERE book_issues.status = $1 ORDER BY book_issues.issue_date DESC LIMIT 10"
        );
        assert_eq!(q.params, vec![json!("issued")]);
    }

    #[test]
    fn test_select_columns_and_range() {
        let q = QueryBuilder::new("students")
            .select("reg_no, course")
            .order_asc("reg_no")
            .range(1000, 1999)
            .build()
            .unwrap();
        assert_eq!(
            q.sql,
            "SELECT students.reg_no, students.course FROM students \
             ORDER BY students.reg_no ASC LIMIT 1000 OFFSET 1000"
        );
        assert!(q.params.is_empty());
    }

    #[test]
    fn test_order_by_several_columns() {
        let q = QueryBuilder::new("students")
            .select("*")
            .order_asc("reg_no")
            .order("course", Order::ascending(false))
            .build()
            .unwrap();
        assert_eq!(
            q.sql,
            "SELECT students.* FROM students ORDER BY students.reg_no ASC, students.course DESC"
        );
    }

    #[test]
    fn test_or_with_comma_in_value() {
        let q = QueryBuilder::new("students")
            .or("name.ilike.%A,B%,reg_no.eq.5")
            .build()
            .unwrap();
        assert_eq!(
            q.sql,
            "SELECT students.* FROM students WHERE (students.name ILIKE $1 OR students.reg_no = $2)"
        );
        assert_eq!(q.params, vec![json!("%A,B%"), json!("5")]);
    }

    #[test]
    fn test_insert_fills_missing_keys_with_null() {
        let q = QueryBuilder::new("book_issues")
            .insert(vec![
                row(json!({"book_name": "Dune", "author": "Herbert"})),
                row(json!({"book_name": "Emma"})),
            ])
            .build()
            .unwrap();
        assert_eq!(
            q.sql,
            "INSERT INTO book_issues (book_name, author) VALUES ($1, $2), ($3, $4) RETURNING *"
        );
        assert_eq!(
            q.params,
            vec![json!("Dune"), json!("Herbert"), json!("Emma"), Value::Null]
        );
    }

    #[test]
    fn test_update_with_in_filter() {
        let q = QueryBuilder::new("book_issues")
            .update(row(json!({"return_date": "2024-03-01", "status": "returned"})))
            .in_("id", vec!["a", "b"])
            .build()
            .unwrap();
        assert_eq!(
            q.sql,
            "UPDATE book_issues SET return_date = $1, status = $2 \
             WHERE book_issues.id IN ($3, $4) RETURNING *"
        );
        assert_eq!(q.params.len(), 4);
    }

    #[test]
    fn test_delete_without_filter() {
        let q = QueryBuilder::new("book_issues").delete().build().unwrap();
        assert_eq!(q.sql, "DELETE FROM book_issues");
    }

    #[test]
    fn test_upsert_updates_non_conflict_columns() {
        let q = QueryBuilder::new("students")
            .upsert(
                vec![row(json!({"reg_no": "S1", "course": "CSE", "name": "Asha"}))],
                UpsertOptions::on_conflict("reg_no, course"),
            )
            .build()
            .unwrap();
        assert_eq!(
            q.sql,
            "INSERT INTO students (reg_no, course, name) VALUES ($1, $2, $3) \
             ON CONFLICT (reg_no, course) DO UPDATE SET name = EXCLUDED.name RETURNING *"
        );
    }

    #[test]
    fn test_upsert_defaults_and_do_nothing() {
        let q = QueryBuilder::new("book_issues")
            .upsert(vec![row(json!({"id": "x"}))], UpsertOptions::default())
            .build()
            .unwrap();
        assert!(q.sql.ends_with("ON CONFLICT (id) DO NOTHING RETURNING *"));

        let q = QueryBuilder::new("students")
            .upsert(
                vec![row(json!({"reg_no": "S1", "course": "CSE", "name": "A"}))],
                UpsertOptions::on_conflict("reg_no,course").ignore_duplicates(),
            )
            .build()
            .unwrap();
        assert!(q.sql.contains("ON CONFLICT (reg_no, course) DO NOTHING"));
    }

    #[test]
    fn test_empty_writes_fail_to_build() {
        assert!(QueryBuilder::new("t").insert(vec![]).build().is_err());
        assert!(QueryBuilder::new("t").update(Row::new()).build().is_err());
        assert!(QueryBuilder::new("t")
            .upsert(vec![], UpsertOptions::default())
            .build()
            .is_err());
    }

    #[derive(Serialize)]
    struct Pair {
        a: i32,
        b: &'static str,
    }

    #[test]
    fn test_to_rows_keeps_field_order() {
        let rows = to_rows(&[Pair { a: 1, b: "x" }]).unwrap();
        let keys: Vec<&str> = rows[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert!(to_row(&5).is_err());
    }
}
