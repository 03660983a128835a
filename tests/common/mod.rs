//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use docgate::auth::{GitHubUser, IdentityProvider};
use docgate::error::{AppError, Result};
use docgate::{AppState, config};
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// In-process stand-in for GitHub
///
/// Each registered authorization code maps to one GitHub user. The access
/// token handed out for code `c` is `gho_c`.
#[derive(Default)]
pub struct FakeGitHub {
    users: HashMap<String, GitHubUser>,
    revoked: Mutex<Vec<String>>,
    fail_revocation: bool,
}

impl FakeGitHub {
    /// Register `code` as a login for `login`.
    pub fn with_user(mut self, code: &str, login: &str, email: Option<&str>) -> Self {
        let id = 1000 + self.users.len() as u64;
        self.users.insert(
            code.to_string(),
            GitHubUser {
                login: login.to_string(),
                id,
                name: None,
                email: email.map(ToOwned::to_owned),
                avatar_url: Some(format!("https://avatars.example.com/{login}.png")),
                html_url: Some(format!("https://github.com/{login}")),
            },
        );
        self
    }

    pub fn failing_revocation(mut self) -> Self {
        self.fail_revocation = true;
        self
    }

    /// Access tokens passed to `revoke_grant`, in call order
    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }

    /// Registry with the logins used across the E2E suite
    pub fn standard() -> Self {
        Self::default()
            .with_user("admin-code", "Octocat", Some("octocat@github.com"))
            .with_user("editor-code", "edith", None)
            .with_user("publisher-code", "pat", Some("Pat@Example.com"))
            .with_user("stranger-code", "mallory", Some("mallory@example.com"))
    }
}

#[async_trait]
impl IdentityProvider for FakeGitHub {
    async fn exchange_code(&self, code: &str) -> Result<String> {
        if self.users.contains_key(code) {
            Ok(format!("gho_{code}"))
        } else {
            Err(AppError::Upstream(
                "GitHub token exchange failed: The code passed is incorrect or expired."
                    .to_string(),
            ))
        }
    }

    async fn fetch_user(&self, access_token: &str) -> Result<GitHubUser> {
        access_token
            .strip_prefix("gho_")
            .and_then(|code| self.users.get(code))
            .cloned()
            .ok_or_else(|| {
                AppError::Upstream("GitHub user fetch failed with status 401".to_string())
            })
    }

    async fn revoke_grant(&self, access_token: &str) -> Result<()> {
        self.revoked.lock().unwrap().push(access_token.to_string());

        if self.fail_revocation {
            return Err(AppError::Upstream(
                "GitHub grant revocation failed with status 500".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration pointing every file at `dir`
pub fn test_config(dir: &Path) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Let OS assign port
            allowed_origins: Vec::new(),
        },
        auth: config::AuthConfig {
            session_ttl_seconds: 3600,
            sweep_interval_seconds: 300,
            allowed_users: Vec::new(),
            admin_users: vec!["octocat".to_string()],
            github: config::GitHubOAuthConfig {
                client_id: "test-client-id".to_string(),
                client_secret: "test-client-secret".to_string(),
                callback_url: "http://localhost:8091/api/auth/github/callback".to_string(),
                oauth_base_url: "https://github.com".to_string(),
                api_base_url: "https://api.github.com".to_string(),
                timeout_seconds: 5,
            },
        },
        storage: config::StorageConfig {
            sessions_path: Some(dir.join("sessions.json")),
            users_path: Some(dir.join("users.json")),
        },
        frontend: config::FrontendConfig::default(),
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

/// Users seeded into users.json before the server starts
pub fn seed_users() -> Value {
    serde_json::json!([
        { "name": "Edith", "githubUsername": "EDITH", "canEdit": true },
        { "name": "Pat", "email": "pat@example.com", "canPublish": true, "canValidate": true },
        { "name": "Octo", "githubUsername": "octocat", "canEdit": false }
    ])
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub github: Arc<FakeGitHub>,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Server whose configuration is adjusted by `configure`
    pub async fn with_config(configure: impl FnOnce(&mut config::AppConfig)) -> Self {
        Self::build(configure, FakeGitHub::standard()).await
    }

    pub async fn build(
        configure: impl FnOnce(&mut config::AppConfig),
        github: FakeGitHub,
    ) -> Self {
        docgate::metrics::init_metrics();

        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("users.json"),
            serde_json::to_vec_pretty(&seed_users()).unwrap(),
        )
        .unwrap();

        let mut config = test_config(temp_dir.path());
        configure(&mut config);

        let github = Arc::new(github);
        let state = AppState::new(config)
            .await
            .unwrap()
            .with_identity_provider(github.clone());

        // Redirects are asserted on, never followed
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = docgate::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: format!("http://{}", addr),
            state,
            github,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    pub fn data_dir(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Log in as a guest and return the login body
    pub async fn guest_login(&self, name: &str) -> Value {
        let response = self
            .client
            .post(self.url("/api/auth/guest"))
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        response.json().await.unwrap()
    }

    pub async fn guest_token(&self) -> String {
        token_of(&self.guest_login("Ann").await)
    }

    /// Start a GitHub login and return the handshake state from the redirect
    pub async fn start_github_login(&self, frontend_redirect_url: Option<&str>) -> String {
        let mut request = self.client.get(self.url("/api/auth/github/start"));
        if let Some(target) = frontend_redirect_url {
            request = request.query(&[("frontendRedirectUrl", target)]);
        }

        let response = request.send().await.unwrap();
        assert_eq!(response.status(), 303);

        let location = location_of(&response);
        query_param(&location, "state").expect("state in authorize redirect")
    }

    /// Deliver the GitHub callback for `code` and `state`
    pub async fn github_callback(&self, code: &str, state: &str) -> reqwest::Response {
        self.client
            .get(self.url("/api/auth/github/callback"))
            .query(&[("code", code), ("state", state)])
            .send()
            .await
            .unwrap()
    }

    /// Full GitHub login without a frontend redirect; returns the login body
    pub async fn github_login(&self, code: &str) -> Value {
        let state = self.start_github_login(None).await;
        let response = self.github_callback(code, &state).await;
        assert_eq!(response.status(), 200);
        response.json().await.unwrap()
    }

    pub async fn github_token(&self, code: &str) -> String {
        token_of(&self.github_login(code).await)
    }

    /// Authenticated GET
    pub async fn get_with_token(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }
}

pub fn token_of(body: &Value) -> String {
    body["token"].as_str().expect("token in body").to_string()
}

pub fn location_of(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}

pub fn query_param(url: &str, name: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Permission strings from a JSON array, sorted
pub fn permissions_of(value: &Value) -> Vec<String> {
    let mut permissions: Vec<String> = value
        .as_array()
        .expect("permission array")
        .iter()
        .map(|p| p.as_str().unwrap().to_string())
        .collect();
    permissions.sort();
    permissions
}
