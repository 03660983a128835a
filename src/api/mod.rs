//! API layer
//!
//! HTTP handlers for:
//! - Login and session management
//! - Documents
//! - User directory
//! - Metrics (Prometheus)

mod auth;
mod documents;
pub mod metrics;
mod users;

pub use auth::auth_router;
pub use documents::documents_router;
pub use metrics::metrics_router;
pub use users::users_router;

use axum::Router;

use crate::AppState;

/// Every `/api` route, relative to the `/api` prefix
pub fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(auth_router(state.clone()))
        .merge(documents_router(state.clone()))
        .merge(users_router(state))
}
