//! Normalizes unset student `in_out` values to "In".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use super::fetch_all;
use super::students::STUDENT_KEY;
use crate::error::Result;
use crate::library::models::DEFAULT_IN_OUT;
use crate::library::STUDENTS;
use crate::query::Client;

#[derive(Debug, Deserialize)]
struct StatusRow {
    reg_no: String,
    course: String,
    #[serde(default)]
    in_out: Option<String>,
}

/// Tally of `in_out` values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub r#in: usize,
    pub out: usize,
    pub unset: usize,
    pub other: usize,
}

impl StatusCounts {
    fn add(&mut self, in_out: Option<&str>) {
        self.total += 1;
        match in_out {
            None => self.unset += 1,
            Some("In") => self.r#in += 1,
            Some("Out") => self.out += 1,
            Some(_) => self.other += 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub before: StatusCounts,
    pub updated: usize,
    pub failed: usize,
    pub after: StatusCounts,
    pub by_course: BTreeMap<String, StatusCounts>,
}

fn tally(rows: &[StatusRow]) -> (StatusCounts, BTreeMap<String, StatusCounts>) {
    let mut overall = StatusCounts::default();
    let mut by_course: BTreeMap<String, StatusCounts> = BTreeMap::new();
    for row in rows {
        overall.add(row.in_out.as_deref());
        by_course
            .entry(row.course.clone())
            .or_default()
            .add(row.in_out.as_deref());
    }
    (overall, by_course)
}

async fn load(client: &Client, page_size: u64) -> Result<Vec<StatusRow>> {
    let rows =
        fetch_all(client, STUDENTS, "reg_no, course, in_out", STUDENT_KEY, page_size).await?;
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(Value::Object(row))
                .map_err(|e| crate::error::BookdeskError::query(format!("Unexpected student row: {e}")))
        })
        .collect()
}

/// Sets `in_out = 'In'` on every student where it is unset.
///
/// Updates go per course in batches of register numbers, and each update
/// re-checks `in_out IS NULL` so a student set meanwhile is left alone.
pub async fn normalize_status(client: &Client, batch_size: usize, page_size: u64) -> Result<StatusReport> {
    let rows = load(client, page_size).await?;
    let (before, _) = tally(&rows);
    info!(
        "{} students: {} In, {} Out, {} unset, {} other",
        before.total, before.r#in, before.out, before.unset, before.other
    );

    let mut unset: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.in_out.is_none()) {
        unset.entry(&row.course).or_default().push(&row.reg_no);
    }

    let mut report = StatusReport {
        before,
        ..StatusReport::default()
    };
    let mut fields = Map::new();
    fields.insert("in_out".into(), json!(DEFAULT_IN_OUT));

    for (course, reg_nos) in &unset {
        for chunk in reg_nos.chunks(batch_size.max(1)) {
            let response = client
                .from(STUDENTS)
                .update(fields.clone())
                .eq("course", *course)
                .in_("reg_no", chunk.iter().copied())
                .or("in_out.is.null")
                .execute(client)
                .await;
            match response.rows() {
                Ok(updated) => {
                    report.updated += updated.len();
                    info!(course, "updated {} students", updated.len());
                }
                Err(e) => {
                    warn!(course, "update batch failed: {}", e.message());
                    report.failed += chunk.len();
                }
            }
        }
    }

    let (after, by_course) = tally(&load(client, page_size).await?);
    for (course, counts) in &by_course {
        info!(course, "In: {}, Out: {}", counts.r#in, counts.out);
    }
    report.after = after;
    report.by_course = by_course;
    Ok(report)
}
