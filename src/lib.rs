//! Docgate - session and authorization gateway for a small document API
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Guest and GitHub OAuth login                             │
//! │  - Documents / user directory endpoints                     │
//! │  - Metrics                                                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Auth Guards                              │
//! │  - attach / require / authorize(permission)                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Auth Core                                │
//! │  - Session store (in-memory, optional JSON snapshot)        │
//! │  - OAuth handshake states                                   │
//! │  - Permission resolver / user directory                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `auth`: Sessions, permissions, OAuth handshakes and guards
//! - `storage`: JSON file helpers shared by the durable stores
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod storage;

use std::sync::Arc;

use auth::{
    DurableSessionStore, GitHubClient, IdentityProvider, InMemorySessionStore, OAuthStateStore,
    SessionStore, UserDirectory,
};

/// Application state shared across all handlers
///
/// Cloned for each request; every component sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Token → session store
    pub sessions: Arc<dyn SessionStore>,

    /// Pending OAuth handshakes
    pub oauth_states: Arc<OAuthStateStore>,

    /// User records for identity lookup
    pub users: Arc<UserDirectory>,

    /// GitHub (or a stand-in during tests)
    pub identity_provider: Arc<dyn IdentityProvider>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Open the session store (durable when `storage.sessions_path` is set)
    /// 2. Load the user directory
    /// 3. Build the GitHub client
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let ttl = config.auth.session_ttl();
        let sessions: Arc<dyn SessionStore> = match &config.storage.sessions_path {
            Some(path) => Arc::new(DurableSessionStore::open(path, ttl).await),
            None => Arc::new(InMemorySessionStore::new(ttl)),
        };

        let users = match &config.storage.users_path {
            Some(path) => UserDirectory::open(path).await,
            None => UserDirectory::in_memory(Vec::new()),
        };

        let github = GitHubClient::new(config.auth.github.clone())?;

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            sessions,
            oauth_states: Arc::new(OAuthStateStore::new()),
            users: Arc::new(users),
            identity_provider: Arc::new(github),
        })
    }

    /// State with no backing files, regardless of the storage settings
    pub fn in_memory(config: config::AppConfig) -> Result<Self, error::AppError> {
        let github = GitHubClient::new(config.auth.github.clone())?;

        Ok(Self {
            sessions: Arc::new(InMemorySessionStore::new(config.auth.session_ttl())),
            oauth_states: Arc::new(OAuthStateStore::new()),
            users: Arc::new(UserDirectory::in_memory(Vec::new())),
            identity_provider: Arc::new(github),
            config: Arc::new(config),
        })
    }

    /// Replace the identity provider
    pub fn with_identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity_provider = provider;
        self
    }

    /// Drop expired sessions and handshakes.
    ///
    /// Returns `(sessions, handshakes)` removed.
    pub async fn sweep_expired(&self) -> (usize, usize) {
        let sessions = self.sessions.purge_expired().await;
        let handshakes = self.oauth_states.purge_expired().await;
        (sessions, handshakes)
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::trace::TraceLayer;

    let cors_layer = build_cors_layer(&state.config.server);

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .nest("/api", api::api_router(state.clone()))
        .merge(api::metrics_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::{HeaderValue, header};
    use tower_http::cors::{Any, CorsLayer};

    if server.allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = server
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::error!(%error, %origin, "Ignoring unparsable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}
