//! Connection integration tests.

use bookdesk::config::{ConnectionConfig, DatabaseConfig};
use bookdesk::db::{PostgresTransport, SqlTransport};
use serde_json::json;

use super::get_test_transport;

#[tokio::test]
async fn test_connect_and_bind_params() {
    let Some(transport) = get_test_transport().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let rows = transport
        .execute("SELECT $1::int + 1 AS n, $2::text AS s", &[json!(41), json!("ok")])
        .await
        .unwrap();
    assert_eq!(rows[0]["n"], json!(42));
    assert_eq!(rows[0]["s"], json!("ok"));
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_query_error_is_reported() {
    let Some(transport) = get_test_transport().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let err = transport
        .execute("SELECT * FROM table_that_does_not_exist", &[])
        .await
        .unwrap_err();
    assert!(err.message().contains("does not exist"), "got: {}", err.message());
}

#[tokio::test(flavor = "current_thread")]
async fn test_connect_with_invalid_host() {
    let config = ConnectionConfig {
        host: Some("invalid.host.that.does.not.exist.local".to_string()),
        port: 5432,
        database: Some("library".to_string()),
        user: Some("librarian".to_string()),
        password: Some("secret".to_string()),
        sslmode: None,
    };

    let result = PostgresTransport::connect(&config, &DatabaseConfig::default()).await;
    let error = result.err().map(|e| e.category());
    assert_eq!(error, Some("Connection Error"));
}
