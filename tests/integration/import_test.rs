//! Paging and bulk-copy tests against a real database.

use std::collections::HashSet;

use bookdesk::import::{fetch_all, STUDENT_KEY};
use bookdesk::library::STUDENTS;
use bookdesk::query::Client;
use serde_json::{json, Value};

use super::{get_test_transport, unique_reg_no};

#[tokio::test]
async fn test_fetch_all_returns_every_student_when_reg_nos_repeat() {
    let Some(transport) = get_test_transport().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let client = Client::new(transport);
    let prefix = unique_reg_no();

    let rows: Vec<_> = (0..6)
        .flat_map(|i| (0..20).map(move |c| (i, c)))
        .map(|(i, c)| {
            match json!({
                "reg_no": format!("{prefix}-{i}"),
                "course": format!("C{c:02}"),
                "name": "Same Name",
                "father": "Father",
                "year": "1",
            }) {
                Value::Object(map) => map,
                _ => unreachable!(),
            }
        })
        .collect();
    let inserted = client.from(STUDENTS).insert(rows).execute(&client).await;
    assert!(inserted.is_ok(), "{:?}", inserted.error);

    for page_size in [7, 37, 1000] {
        let all = fetch_all(&client, STUDENTS, "reg_no, course", STUDENT_KEY, page_size)
            .await
            .unwrap();
        let ours: Vec<(String, String)> = all
            .iter()
            .filter_map(|row| {
                let reg_no = row.get("reg_no")?.as_str()?;
                let course = row.get("course")?.as_str()?;
                reg_no
                    .starts_with(&prefix)
                    .then(|| (reg_no.to_string(), course.to_string()))
            })
            .collect();
        let distinct: HashSet<_> = ours.iter().cloned().collect();
        assert_eq!(ours.len(), 120, "page size {page_size}");
        assert_eq!(distinct.len(), 120, "page size {page_size}");
    }

    let _ = client
        .from(STUDENTS)
        .delete()
        .ilike("reg_no", &format!("{prefix}-%"))
        .execute(&client)
        .await;
}
