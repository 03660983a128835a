//! Error types for Docgate
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.
//!
//! The body always carries a machine-readable `reason` so clients can tell
//! "log in again" (401) apart from "you lack access" (403) and
//! "try again later" (502).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::auth::Permission;

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// No bearer token on a request that needs one (401)
    #[error("Authentication required")]
    AuthenticationMissing,

    /// Bearer token is unknown or expired (401)
    #[error("Invalid or expired token")]
    AuthenticationInvalid,

    /// Valid session without the required permission (403)
    #[error("Forbidden: missing permission")]
    MissingPermission(Permission),

    /// Access refused for a reason other than a missing permission (403)
    #[error("{0}")]
    Forbidden(String),

    /// Unknown, expired or replayed OAuth state (400)
    #[error("Invalid or expired OAuth state")]
    HandshakeInvalid,

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Identity provider call failed (502)
    #[error("Upstream identity provider error: {0}")]
    Upstream(String),

    /// Identity provider is not configured (500)
    #[error("{0}")]
    ConfigurationMissing(String),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local storage error (500)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// Machine-readable reason, also used as the error metric label
    pub fn reason(&self) -> &'static str {
        match self {
            AppError::AuthenticationMissing => "authentication_required",
            AppError::AuthenticationInvalid => "invalid_token",
            AppError::MissingPermission(_) => "missing_permission",
            AppError::Forbidden(_) => "forbidden",
            AppError::HandshakeInvalid => "invalid_oauth_state",
            AppError::Validation(_) => "validation",
            AppError::NotFound => "not_found",
            AppError::Upstream(_) => "upstream",
            AppError::ConfigurationMissing(_) => "configuration_missing",
            AppError::Config(_) => "config",
            AppError::Storage(_) => "storage",
            AppError::Internal(_) => "internal",
        }
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::AuthenticationMissing | AppError::AuthenticationInvalid => {
                StatusCode::UNAUTHORIZED
            }
            AppError::MissingPermission(_) | AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::HandshakeInvalid | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::ConfigurationMissing(_)
            | AppError::Config(_)
            | AppError::Storage(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Maps each error variant to appropriate HTTP status code
    /// and JSON error body.
    fn into_response(self) -> Response {
        use axum::Json;

        let status = self.status();
        let reason = self.reason();

        let mut body = match &self {
            AppError::Validation(msg) => serde_json::json!({ "error": msg }),
            AppError::Upstream(details) => serde_json::json!({
                "error": "Upstream identity provider error",
                "details": details,
            }),
            AppError::Storage(_) => serde_json::json!({ "error": "Storage error" }),
            AppError::Internal(error) => {
                tracing::error!(%error, "Internal error");
                serde_json::json!({ "error": "Internal server error" })
            }
            _ => serde_json::json!({ "error": self.to_string() }),
        };

        body["reason"] = serde_json::Value::from(reason);
        if let AppError::MissingPermission(permission) = &self {
            body["required"] = serde_json::Value::from(permission.as_str());
        }

        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[reason]).inc();

        (status, Json(body)).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
