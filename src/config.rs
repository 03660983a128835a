//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub frontend: FrontendConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8091)
    pub port: u16,
    /// Allowed CORS origins; empty means permissive
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Session and login configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Default session lifetime in seconds (default: 86400 = 24h)
    pub session_ttl_seconds: i64,
    /// Period of the background expiry sweep in seconds (default: 300)
    pub sweep_interval_seconds: u64,
    /// GitHub logins allowed to sign in; empty allows everyone
    #[serde(default)]
    pub allowed_users: Vec<String>,
    /// GitHub logins granted every permission
    #[serde(default)]
    pub admin_users: Vec<String>,
    pub github: GitHubOAuthConfig,
}

impl AuthConfig {
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(
            self.session_ttl_seconds
                .clamp(1, crate::auth::session::MAX_SESSION_TTL_SECONDS),
        )
    }

    /// Whether `login` may sign in at all.
    pub fn is_allowed(&self, login: &str) -> bool {
        self.allowed_users.iter().all(|entry| entry.trim().is_empty())
            || contains_login(&self.allowed_users, login)
    }

    pub fn is_admin(&self, login: &str) -> bool {
        contains_login(&self.admin_users, login)
    }
}

fn contains_login(list: &[String], login: &str) -> bool {
    let login = login.trim().to_lowercase();
    !login.is_empty()
        && list
            .iter()
            .any(|entry| entry.trim().to_lowercase() == login)
}

/// GitHub OAuth configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubOAuthConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Redirect URI registered with the OAuth app
    pub callback_url: String,
    /// Web host serving /login/oauth/* (default: https://github.com)
    pub oauth_base_url: String,
    /// REST API host (default: https://api.github.com)
    pub api_base_url: String,
    /// Per-request timeout against GitHub
    pub timeout_seconds: u64,
}

impl GitHubOAuthConfig {
    /// Both client id and secret are set
    pub fn is_configured(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

/// Local file storage
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Session snapshot file; unset keeps sessions in memory only
    pub sessions_path: Option<PathBuf>,
    /// User-record collection file; unset keeps users in memory only
    pub users_path: Option<PathBuf>,
}

/// Frontend redirect targets
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrontendConfig {
    /// Default post-login destination
    pub github_success_url: Option<String>,
    /// Destination for failed GitHub callbacks
    pub github_error_url: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (DOCGATE__*), lists comma-separated
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8091)?
            .set_default("auth.session_ttl_seconds", 86400)?
            .set_default("auth.sweep_interval_seconds", 300)?
            .set_default(
                "auth.github.callback_url",
                "http://localhost:8091/api/auth/github/callback",
            )?
            .set_default("auth.github.oauth_base_url", "https://github.com")?
            .set_default("auth.github.api_base_url", "https://api.github.com")?
            .set_default("auth.github.timeout_seconds", 10)?
            .set_default("storage.users_path", "data/users.json")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (DOCGATE__*)
            .add_source(
                Environment::with_prefix("DOCGATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.allowed_origins")
                    .with_list_parse_key("auth.allowed_users")
                    .with_list_parse_key("auth.admin_users"),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        if self.auth.session_ttl_seconds <= 0 {
            return Err(crate::error::AppError::Config(
                "auth.session_ttl_seconds must be greater than 0".to_string(),
            ));
        }

        if self.auth.session_ttl_seconds > crate::auth::session::MAX_SESSION_TTL_SECONDS {
            return Err(crate::error::AppError::Config(format!(
                "auth.session_ttl_seconds must be at most {}",
                crate::auth::session::MAX_SESSION_TTL_SECONDS
            )));
        }

        if self.auth.github.timeout_seconds == 0 {
            return Err(crate::error::AppError::Config(
                "auth.github.timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.auth.sweep_interval_seconds == 0 {
            return Err(crate::error::AppError::Config(
                "auth.sweep_interval_seconds must be greater than 0".to_string(),
            ));
        }

        validate_url("auth.github.callback_url", &self.auth.github.callback_url)?;
        validate_url("auth.github.oauth_base_url", &self.auth.github.oauth_base_url)?;
        validate_url("auth.github.api_base_url", &self.auth.github.api_base_url)?;

        if let Some(url) = &self.frontend.github_success_url {
            validate_url("frontend.github_success_url", url)?;
        }
        if let Some(url) = &self.frontend.github_error_url {
            validate_url("frontend.github_error_url", url)?;
        }

        if !self.auth.github.is_configured() {
            tracing::warn!("GitHub OAuth is not configured; only guest login is available");
        }

        if self.storage.sessions_path.is_none() {
            tracing::warn!("storage.sessions_path is unset; sessions will not survive a restart");
        }

        Ok(())
    }
}

fn validate_url(key: &str, value: &str) -> Result<(), crate::error::AppError> {
    let url = url::Url::parse(value)
        .map_err(|e| crate::error::AppError::Config(format!("{key} is not a valid URL: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(crate::error::AppError::Config(format!(
            "{key} must use http or https"
        )));
    }

    Ok(())
}
