//! ShowTrack Reference Server
//!
//! A development backend for the ShowTrack offline-first clients: journal
//! entries and animal records over REST, kept in memory.
//!
//! # Configuration
//!
//! Environment variables:
//! - `SHOWTRACK_PORT`: Port to listen on (default: 8080)
//! - `SHOWTRACK_SERVER_CONFIG`: Path to config file (default: ~/.config/showtrack-server/config.yaml)
//!
//! # Config File Format
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     owner_id: "student-1"
//! ```
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint (no auth required)
//! - `GET|POST /journal_entries`, `GET|PATCH|DELETE /journal_entries/{id}`
//! - `GET|POST /animals`, `GET|PATCH|DELETE /animals/{id}`
//! - `POST /webhooks/enrich`: Accepts AI enrichment requests

use showtrack::server::{router, ApiKeyStore, AppState, ServerConfig};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "showtrack=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    tracing::info!("Config file: {}", config.config_path.display());

    let api_keys = ApiKeyStore::load(&config.config_path);
    let app = router(AppState::new(api_keys));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
