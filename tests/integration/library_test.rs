//! Library workflow tests against a real database.

use bookdesk::library::{IssueRequest, Library, Student, StudentKey, BOOK_ISSUES, STUDENTS};
use bookdesk::query::{to_rows, Client, Response, UpsertOptions};
use chrono::NaiveDate;
use serde_json::json;

use super::{get_test_transport, unique_reg_no};

fn student(reg_no: &str, course: &str, name: &str) -> Student {
    Student {
        reg_no: reg_no.to_string(),
        course: course.to_string(),
        name: name.to_string(),
        father: "Father".to_string(),
        year: "2".to_string(),
        in_out: None,
        created_at: None,
        updated_at: None,
    }
}

fn book(name: &str) -> IssueRequest {
    IssueRequest {
        book_name: name.to_string(),
        author: "Author".to_string(),
        book_no: format!("{name}-1"),
        issue_date: "2024-01-10".to_string(),
        ..Default::default()
    }
}

async fn cleanup(client: &Client, reg_no: &str) {
    let _ = client
        .from(BOOK_ISSUES)
        .delete()
        .eq("student_reg_no", reg_no)
        .execute(client)
        .await;
    let _ = client
        .from(STUDENTS)
        .delete()
        .eq("reg_no", reg_no)
        .execute(client)
        .await;
}

async fn count(client: &Client, table: &str, column: &str, value: &str) -> usize {
    client
        .from(table)
        .select("*")
        .eq(column, value)
        .execute(client)
        .await
        .rows()
        .unwrap()
        .len()
}

#[tokio::test]
async fn test_issue_and_return_cycle() {
    let Some(transport) = get_test_transport().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let client = Client::new(transport);
    let library = Library::new(client.clone());
    let reg_no = unique_reg_no();
    let key = StudentKey::new(&reg_no, "CSE");

    let inserted: Response = client
        .from(STUDENTS)
        .insert(to_rows(&[student(&reg_no, "CSE", "Asha"), student(&reg_no, "ECE", "Asha")]).unwrap())
        .execute(&client)
        .await;
    assert!(inserted.is_ok(), "{:?}", inserted.error);

    let issued = library
        .issue_books(&key, vec![book("Dune"), book("Emma")])
        .await
        .unwrap();
    assert_eq!(issued.len(), 2);
    assert!(issued.iter().all(|r| r.id.is_some() && r.is_consistent()));

    let id = issued[1].id.clone().unwrap();
    let date = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
    let returned = library.return_books(&[id], date).await.unwrap();
    assert_eq!(returned[0].return_date.as_deref(), Some("2024-02-01"));

    let ledger = library.student_stats(&key).await.unwrap();
    assert_eq!((ledger.issued, ledger.returned, ledger.pending), (2, 1, 1));

    let other = library
        .student_stats(&StudentKey::new(&reg_no, "ECE"))
        .await
        .unwrap();
    assert_eq!(other.issued, 0);

    let pending = library.pending_books(&key).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].book_name, "Dune");

    let found = library.search_students(&reg_no, 10).await.unwrap();
    assert_eq!(found.len(), 2);

    cleanup(&client, &reg_no).await;
}

#[tokio::test]
async fn test_upsert_ignore_duplicates_keeps_existing_values() {
    let Some(transport) = get_test_transport().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let client = Client::new(transport);
    let reg_no = unique_reg_no();

    let original = to_rows(&[student(&reg_no, "CSE", "Original")]).unwrap();
    let renamed = to_rows(&[student(&reg_no, "CSE", "Renamed")]).unwrap();

    client
        .from(STUDENTS)
        .insert(original)
        .execute(&client)
        .await
        .rows()
        .unwrap();

    client
        .from(STUDENTS)
        .upsert(
            renamed.clone(),
            UpsertOptions::on_conflict("reg_no,course").ignore_duplicates(),
        )
        .execute(&client)
        .await
        .rows()
        .unwrap();
    let kept: Student = client
        .from(STUDENTS)
        .select("*")
        .eq("reg_no", reg_no.as_str())
        .single()
        .execute(&client)
        .await
        .into_single()
        .unwrap();
    assert_eq!(kept.name, "Original");

    client
        .from(STUDENTS)
        .upsert(renamed, UpsertOptions::on_conflict("reg_no,course"))
        .execute(&client)
        .await
        .rows()
        .unwrap();
    let updated: Student = client
        .from(STUDENTS)
        .select("*")
        .eq("reg_no", reg_no.as_str())
        .single()
        .execute(&client)
        .await
        .into_single()
        .unwrap();
    assert_eq!(updated.name, "Renamed");

    cleanup(&client, &reg_no).await;
}

#[tokio::test]
async fn test_deleting_records_keeps_students() {
    let Some(transport) = get_test_transport().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let client = Client::new(transport);
    let library = Library::new(client.clone());
    let reg_no = unique_reg_no();
    let key = StudentKey::new(&reg_no, "CSE");

    client
        .from(STUDENTS)
        .insert(to_rows(&[student(&reg_no, "CSE", "Asha")]).unwrap())
        .execute(&client)
        .await
        .rows()
        .unwrap();
    let issued = library.issue_books(&key, vec![book("Dune")]).await.unwrap();

    library
        .delete_record(issued[0].id.as_deref().unwrap())
        .await
        .unwrap();

    assert_eq!(count(&client, BOOK_ISSUES, "student_reg_no", &reg_no).await, 0);
    assert_eq!(count(&client, STUDENTS, "reg_no", &reg_no).await, 1);

    cleanup(&client, &reg_no).await;
}

#[tokio::test]
async fn test_status_constraint_rejects_inconsistent_record() {
    let Some(transport) = get_test_transport().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let client = Client::new(transport);
    let reg_no = unique_reg_no();

    client
        .from(STUDENTS)
        .insert(to_rows(&[student(&reg_no, "CSE", "Asha")]).unwrap())
        .execute(&client)
        .await
        .rows()
        .unwrap();

    let bad = match json!({
        "student_reg_no": reg_no,
        "student_course": "CSE",
        "book_name": "Dune",
        "author": "Herbert",
        "book_no": "B-1",
        "issue_date": "2024-01-10",
        "return_date": null,
        "status": "returned",
    }) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    let response = client.from(BOOK_ISSUES).insert(vec![bad]).execute(&client).await;
    assert!(response.error.is_some());

    cleanup(&client, &reg_no).await;
}
