//! Integration tests for bookdesk.
//!
//! These tests require a running PostgreSQL database.
//! Set DATABASE_URL environment variable to run them.

pub mod connection_test;
pub mod import_test;
pub mod library_test;
pub mod proxy_test;

use std::sync::Arc;

use bookdesk::config::{ConnectionConfig, DatabaseConfig};
use bookdesk::db::PostgresTransport;
use bookdesk::library::schema;

/// Helper to get test database URL from environment.
pub fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

/// Connects and makes sure the library tables exist.
pub async fn get_test_transport() -> Option<Arc<PostgresTransport>> {
    let url = get_test_database_url()?;
    let config = ConnectionConfig::from_connection_string(&url).ok()?;
    let transport = PostgresTransport::connect(&config, &DatabaseConfig::default())
        .await
        .ok()?;
    schema::apply(&transport).await.ok()?;
    Some(Arc::new(transport))
}

/// A register number no other test run will use.
pub fn unique_reg_no() -> String {
    format!("T-{}", uuid::Uuid::new_v4().simple())
}
