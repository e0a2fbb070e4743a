//! HTTP SQL proxy.
//!
//! Exposes `POST /api/sql` over a [`SqlTransport`], `GET /health`, and
//! optionally the dashboard's static assets.

mod handler;

use std::path::Path;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ProxyConfig;
use crate::db::SqlTransport;
use crate::error::{BookdeskError, Result};
use crate::safety::StrictChecker;

pub use handler::{api_sql, health};

/// Shared state for the proxy handlers.
#[derive(Clone)]
pub struct AppState {
    pub transport: Arc<dyn SqlTransport>,
    /// Present when strict parsing is enabled.
    pub strict: Option<Arc<StrictChecker>>,
}

impl AppState {
    pub fn new(transport: Arc<dyn SqlTransport>, strict: bool) -> Self {
        Self {
            transport,
            strict: strict.then(|| Arc::new(StrictChecker::new())),
        }
    }
}

/// Builds the proxy router.
pub fn router(state: AppState, settings: &ProxyConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .route("/api/sql", post(api_sql))
        .route("/health", get(health));

    if let Some(dir) = &settings.static_dir {
        app = app.fallback_service(static_files(dir));
    }

    app.layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(settings.body_limit_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serves files from `dir`, answering unknown paths with `index.html`.
fn static_files(dir: &Path) -> ServeDir<ServeFile> {
    ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html")))
}

/// Binds the configured address and serves until Ctrl-C.
pub async fn serve(settings: &ProxyConfig, transport: Arc<dyn SqlTransport>) -> Result<()> {
    let state = AppState::new(transport, settings.strict);
    let app = router(state, settings);

    let listener = TcpListener::bind(&settings.bind)
        .await
        .map_err(|e| BookdeskError::config(format!("Failed to bind to {}: {e}", settings.bind)))?;

    info!("bookdesk proxy listening on http://{}", settings.bind);
    info!("   POST /api/sql  - execute a whitelisted statement");
    info!("   GET  /health   - health check");
    if let Some(dir) = &settings.static_dir {
        info!("   static files from {}", dir.display());
    }
    if settings.strict {
        info!("strict statement parsing enabled");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .map_err(|e| BookdeskError::internal(format!("Server error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RecordingTransport;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app(transport: Arc<RecordingTransport>, strict: bool) -> Router {
        router(AppState::new(transport, strict), &ProxyConfig::default())
    }

    async fn post_sql(app: Router, body: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/sql")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_select_returns_rows() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_json(vec![json!({"count": 3})]);

        let (status, body) = post_sql(
            app(transport.clone(), false),
            r#"{"sql": "SELECT COUNT(*) AS count FROM students WHERE course = $1", "params": ["CSE"]}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"data": [{"count": 3}], "error": null}));
        assert_eq!(transport.last().unwrap().params, vec![json!("CSE")]);
    }

    #[tokio::test]
    async fn test_drop_is_rejected_before_execution() {
        let transport = Arc::new(RecordingTransport::new());
        let (status, body) =
            post_sql(app(transport.clone(), false), r#"{"sql": "DROP TABLE students"}"#).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            json!({"data": null, "error": "Only SELECT/INSERT/UPDATE/DELETE allowed"})
        );
        assert!(transport.statements().is_empty());
    }

    #[tokio::test]
    async fn test_missing_sql() {
        let transport = Arc::new(RecordingTransport::new());
        let (status, body) = post_sql(app(transport, false), r#"{"params": []}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("SQL query is required"));
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let transport = Arc::new(RecordingTransport::new());
        let (status, body) = post_sql(app(transport, false), "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("Invalid JSON body"));
    }

    #[tokio::test]
    async fn test_database_error_is_400() {
        let transport = Arc::new(RecordingTransport::new());
        transport.push_error("relation \"nope\" does not exist");
        let (status, body) =
            post_sql(app(transport, false), r#"{"sql": "SELECT * FROM nope"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            json!({"data": null, "error": "relation \"nope\" does not exist"})
        );
    }

    #[tokio::test]
    async fn test_strict_mode_rejects_stacked_statements() {
        let sql = r#"{"sql": "SELECT 1; DROP TABLE students"}"#;

        let lenient = Arc::new(RecordingTransport::new());
        let (status, _) = post_sql(app(lenient.clone(), false), sql).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(lenient.statements().len(), 1);

        let strict = Arc::new(RecordingTransport::new());
        let (status, body) = post_sql(app(strict.clone(), true), sql).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("Only one statement per request"));
        assert!(strict.statements().is_empty());
    }

    #[tokio::test]
    async fn test_health() {
        let transport = Arc::new(RecordingTransport::new());
        let response = app(transport, false)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], json!("ok"));
    }

    #[tokio::test]
    async fn test_static_fallback_serves_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>Library</h1>").unwrap();

        let settings = ProxyConfig {
            static_dir: Some(dir.path().to_path_buf()),
            ..ProxyConfig::default()
        };
        let transport = Arc::new(RecordingTransport::new());
        let app = router(AppState::new(transport, false), &settings);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/dashboard/anything")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"<h1>Library</h1>");
    }
}
