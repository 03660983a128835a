//! GitHub identity provider client
//!
//! Three calls: exchange an authorization code, fetch the authenticated
//! user, and revoke a grant. They sit behind [`IdentityProvider`] so the
//! callback flow can be driven without network access.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::GitHubOAuthConfig;
use crate::error::{AppError, Result};
use crate::metrics::record_upstream;

/// Scopes requested on the authorize redirect
pub const OAUTH_SCOPE: &str = "read:user user:email";

const GITHUB_API_VERSION: &str = "2022-11-28";
const GITHUB_ACCEPT: &str = "application/vnd.github+json";

/// Authenticated GitHub user profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// Outbound identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Trade an authorization code for an access token.
    async fn exchange_code(&self, code: &str) -> Result<String>;

    /// Profile of the user owning `access_token`.
    async fn fetch_user(&self, access_token: &str) -> Result<GitHubUser>;

    /// Revoke the OAuth grant behind `access_token`.
    async fn revoke_grant(&self, access_token: &str) -> Result<()>;
}

/// GitHub token endpoint response
///
/// GitHub answers 200 with an `error` field when the exchange fails.
#[derive(Debug, Deserialize)]
struct GitHubTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl GitHubTokenResponse {
    fn into_access_token(self) -> Result<String> {
        if let Some(error) = self.error {
            let message = self.error_description.unwrap_or(error);
            return Err(AppError::Upstream(format!(
                "GitHub token exchange failed: {message}"
            )));
        }

        self.access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                AppError::Upstream("GitHub token exchange returned no access token".to_string())
            })
    }
}

/// reqwest-backed GitHub client
pub struct GitHubClient {
    http: reqwest::Client,
    config: GitHubOAuthConfig,
}

impl GitHubClient {
    pub fn new(config: GitHubOAuthConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("Docgate/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self { http, config })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }
}

/// Build the GitHub authorize redirect for `state`.
pub fn authorize_url(config: &GitHubOAuthConfig, state: &str) -> Result<Url> {
    let base = config.oauth_base_url.trim_end_matches('/');
    let mut url = Url::parse(&format!("{base}/login/oauth/authorize"))
        .map_err(|e| AppError::Config(format!("auth.github.oauth_base_url: {e}")))?;

    url.query_pairs_mut()
        .append_pair("client_id", &config.client_id)
        .append_pair("redirect_uri", &config.callback_url)
        .append_pair("scope", OAUTH_SCOPE)
        .append_pair("state", state);

    Ok(url)
}

fn upstream(context: &str, error: reqwest::Error) -> AppError {
    AppError::Upstream(format!("{context}: {}", error.without_url()))
}

/// Error body shapes GitHub sends on failure
///
/// The OAuth endpoints use `error`/`error_description`, the REST API uses
/// `message`.
#[derive(Debug, Default, Deserialize)]
struct GitHubErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl GitHubErrorBody {
    fn into_message(self) -> Option<String> {
        self.error_description
            .or(self.message)
            .or(self.error)
            .filter(|message| !message.trim().is_empty())
    }
}

/// Upstream error for a non-success response, carrying GitHub's message
/// when the body has one.
async fn status_error(context: &str, response: reqwest::Response) -> AppError {
    let status = response.status();
    let message = match response.text().await {
        Ok(body) => serde_json::from_str::<GitHubErrorBody>(&body)
            .ok()
            .and_then(GitHubErrorBody::into_message),
        Err(_) => None,
    };

    match message {
        Some(message) => AppError::Upstream(format!("{context} with status {status}: {message}")),
        None => AppError::Upstream(format!("{context} with status {status}")),
    }
}

#[async_trait]
impl IdentityProvider for GitHubClient {
    async fn exchange_code(&self, code: &str) -> Result<String> {
        let url = format!(
            "{}/login/oauth/access_token",
            self.config.oauth_base_url.trim_end_matches('/')
        );

        let result = async {
            let response = self
                .http
                .post(&url)
                .header(reqwest::header::ACCEPT, "application/json")
                .json(&serde_json::json!({
                    "client_id": self.config.client_id,
                    "client_secret": self.config.client_secret,
                    "code": code,
                    "redirect_uri": self.config.callback_url,
                }))
                .send()
                .await
                .map_err(|e| upstream("GitHub token exchange failed", e))?;

            if !response.status().is_success() {
                return Err(status_error("GitHub token exchange failed", response).await);
            }

            response
                .json::<GitHubTokenResponse>()
                .await
                .map_err(|e| upstream("GitHub token exchange returned invalid JSON", e))?
                .into_access_token()
        }
        .await;

        record_upstream("exchange_code", result.is_ok());
        result
    }

    async fn fetch_user(&self, access_token: &str) -> Result<GitHubUser> {
        let result = async {
            let response = self
                .http
                .get(self.api_url("/user"))
                .bearer_auth(access_token)
                .header(reqwest::header::ACCEPT, GITHUB_ACCEPT)
                .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
                .send()
                .await
                .map_err(|e| upstream("GitHub user fetch failed", e))?;

            if !response.status().is_success() {
                return Err(status_error("GitHub user fetch failed", response).await);
            }

            response
                .json::<GitHubUser>()
                .await
                .map_err(|e| upstream("GitHub user fetch returned invalid JSON", e))
        }
        .await;

        record_upstream("fetch_user", result.is_ok());
        result
    }

    async fn revoke_grant(&self, access_token: &str) -> Result<()> {
        if !self.config.is_configured() {
            return Ok(());
        }

        let url = self.api_url(&format!("/applications/{}/grant", self.config.client_id));
        let result = async {
            let response = self
                .http
                .delete(url)
                .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
                .header(reqwest::header::ACCEPT, GITHUB_ACCEPT)
                .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
                .json(&serde_json::json!({ "access_token": access_token }))
                .send()
                .await
                .map_err(|e| upstream("GitHub grant revocation failed", e))?;

            if !response.status().is_success() {
                return Err(status_error("GitHub grant revocation failed", response).await);
            }
            Ok(())
        }
        .await;

        record_upstream("revoke_grant", result.is_ok());
        result
    }
}
