//! Reference implementation of the ShowTrack managed backend.
//!
//! Serves the REST collections the sync layer talks to, with in-memory
//! storage. Intended for local development and end-to-end tests.

pub mod auth;
pub mod routes;
pub mod storage;

use axum::{middleware, routing::get, Json, Router};
use serde::Serialize;
use showtrack_core::{AnimalRecord, JournalEntry};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use auth::{ApiKeyStore, AuthUser};
pub use storage::{EnrichmentRequest, ServerStorage};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Path to the API key file
    pub config_path: PathBuf,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let port = std::env::var("SHOWTRACK_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let config_path = std::env::var("SHOWTRACK_SERVER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("showtrack-server")
                    .join("config.yaml")
            });

        Self { port, config_path }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub api_keys: Arc<ApiKeyStore>,
    pub storage: Arc<ServerStorage>,
}

impl AppState {
    pub fn new(api_keys: ApiKeyStore) -> Self {
        Self {
            api_keys: Arc::new(api_keys),
            storage: Arc::new(ServerStorage::new()),
        }
    }
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint (no auth required)
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new().route("/health", get(health));

    let protected_routes = Router::new()
        .merge(routes::entity_routes::<JournalEntry>())
        .merge(routes::entity_routes::<AnimalRecord>())
        .merge(routes::webhook_routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        router(AppState::new(ApiKeyStore::from_entries([
            ("key-a", "owner-a"),
            ("key-b", "owner-b"),
        ])))
    }

    fn request(method: &str, uri: &str, key: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", key));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn entry_body(title: &str) -> Value {
        json!({
            "title": title,
            "content": "",
            "category": "feeding",
            "entry_date": "2025-03-01",
        })
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let response = app()
            .oneshot(request("GET", "/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_collections_require_bearer_key() {
        let response = app()
            .oneshot(request("GET", "/journal_entries", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app()
            .oneshot(request("GET", "/animals", Some("wrong"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_sets_server_fields() {
        let response = app()
            .oneshot(request(
                "POST",
                "/journal_entries",
                Some("key-a"),
                Some(entry_body("Evening feed")),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = json_body(response).await;
        assert_eq!(body["owner_id"], "owner-a");
        assert_eq!(body["version"], 1);
        assert_eq!(body["title"], "Evening feed");
        assert!(body["id"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[tokio::test]
    async fn test_invalid_body_is_422_with_message() {
        let response = app()
            .oneshot(request(
                "POST",
                "/journal_entries",
                Some("key-a"),
                Some(entry_body("   ")),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = json_body(response).await;
        assert!(body["message"].as_str().unwrap().contains("title"));
    }

    #[tokio::test]
    async fn test_other_owners_rows_are_invisible() {
        let app = app();
        let created = app
            .clone()
            .oneshot(request(
                "POST",
                "/journal_entries",
                Some("key-a"),
                Some(entry_body("Mine")),
            ))
            .await
            .unwrap();
        let id = json_body(created).await["id"].as_str().unwrap().to_string();
        let uri = format!("/journal_entries/{}", id);

        let response = app
            .clone()
            .oneshot(request("GET", &uri, Some("key-b"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(request("DELETE", &uri, Some("key-b"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(request("GET", &uri, Some("key-a"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_enrich_webhook_accepts() {
        let response = app()
            .oneshot(request(
                "POST",
                "/webhooks/enrich",
                Some("key-a"),
                Some(json!({
                    "entity_kind": "journal_entries",
                    "entity_id": "abc",
                    "payload": entry_body("x"),
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
