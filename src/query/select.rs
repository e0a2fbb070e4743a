//! Projection parsing for `select("col, rel(c1, c2)")`.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{BookdeskError, Result};

static RELATION: OnceLock<Regex> = OnceLock::new();
static DOUBLE_COMMA: OnceLock<Regex> = OnceLock::new();

/// Returns a compiled pattern, compiling it on first use.
pub(crate) fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> Result<&'static Regex> {
    if let Some(re) = cell.get() {
        return Ok(re);
    }
    let re = Regex::new(pattern)
        .map_err(|e| BookdeskError::internal(format!("Bad pattern {pattern}: {e}")))?;
    Ok(cell.get_or_init(|| re))
}

/// An embedded related table, e.g. `students(name, course)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub table: String,
    pub columns: Vec<String>,
}

/// Parsed select list. An empty `columns` means every column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    pub columns: Vec<String>,
    pub relations: Vec<Relation>,
}

/// Splits a select string into plain columns and relations.
///
/// Relations are extracted in one pass; whatever text remains is cleaned of
/// stray commas and treated as the primary column list.
pub fn parse_select(select: &str) -> Result<Projection> {
    let relation = cached(&RELATION, r"(\w+)\(([^)]+)\)")?;
    let double_comma = cached(&DOUBLE_COMMA, r",\s*,")?;

    let mut relations = Vec::new();
    let stripped = relation.replace_all(select, |caps: &regex::Captures<'_>| {
        relations.push(Relation {
            table: caps[1].to_string(),
            columns: split_list(&caps[2]),
        });
        String::new()
    });

    let collapsed = double_comma.replace_all(&stripped, ",");
    let cleaned = collapsed
        .trim()
        .trim_end_matches(|c: char| c == ',' || c.is_whitespace())
        .trim_start_matches(|c: char| c == ',' || c.is_whitespace())
        .trim();

    let columns = if cleaned.is_empty() || cleaned == "*" {
        Vec::new()
    } else {
        split_list(cleaned)
    };

    Ok(Projection { columns, relations })
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Column on the base table that points at `relation`.
pub fn foreign_key_column(relation: &str) -> String {
    match relation {
        "students" => "student_reg_no".to_string(),
        "staff" => "staff_id".to_string(),
        other => format!("{other}_id"),
    }
}

/// `LEFT JOIN` clause that brings `relation` into a query on `table`.
pub fn join_clause(table: &str, relation: &str) -> String {
    match relation {
        "students" => format!(
            "LEFT JOIN students ON {table}.student_reg_no = students.reg_no \
             AND {table}.student_course = students.course"
        ),
        "staff" => format!("LEFT JOIN staff ON {table}.staff_id = staff.staff_id"),
        other => format!("LEFT JOIN {other} ON {table}.{other}_id = {other}.id"),
    }
}

impl Projection {
    /// Renders the select list and the joins it needs.
    pub fn render(&self, table: &str) -> (String, Vec<String>) {
        let mut parts: Vec<String> = if self.columns.is_empty() {
            vec![format!("{table}.*")]
        } else {
            self.columns
                .iter()
                .map(|c| format!("{table}.{c}"))
                .collect()
        };

        let mut joins = Vec::with_capacity(self.relations.len());
        for rel in &self.relations {
            joins.push(join_clause(table, &rel.table));

            let pairs = rel
                .columns
                .iter()
                .map(|c| format!("'{c}', {}.{c}", rel.table))
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!(
                "CASE WHEN {table}.{fk} IS NOT NULL THEN json_build_object({pairs}) END AS {alias}",
                fk = foreign_key_column(&rel.table),
                alias = rel.table,
            ));
        }

        (parts.join(", "), joins)
    }
}
