//! Prometheus metrics endpoint

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, TextEncoder};

use crate::AppState;
use crate::metrics::{OAUTH_STATES_PENDING, REGISTRY, SESSIONS_ACTIVE};

/// GET /metrics
///
/// Refreshes the store gauges, then renders every registered metric in the
/// Prometheus text format.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    SESSIONS_ACTIVE.set(state.sessions.count().await as i64);
    OAUTH_STATES_PENDING.set(state.oauth_states.pending().await as i64);

    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&REGISTRY.gather()) {
        Ok(metrics_text) => (
            StatusCode::OK,
            [(CONTENT_TYPE, encoder.format_type())],
            metrics_text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

/// Create metrics router
///
/// Exposes the `/metrics` endpoint.
pub fn metrics_router() -> Router<AppState> {
    Router::new().route("/metrics", get(metrics_handler))
}
