//! Login, identity and logout endpoints
//!
//! Guest login, the GitHub OAuth redirect/callback pair, and the
//! bearer-token endpoints built on the session guards.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;
use crate::auth::github::{GitHubUser, authorize_url};
use crate::auth::{
    AuthProvider, CapabilityFlags, CurrentUser, MaybeUser, NewSession, PermissionSet, Role,
    Session, SessionKind, SessionUser, attach_session, permissions_for_role,
    permissions_from_flags, require_auth,
};
use crate::error::{AppError, Result};

/// Longest accepted guest display name, in characters
const GUEST_NAME_MAX_CHARS: usize = 50;

const GITHUB_CALLBACK_FAILED: &str = "GitHub OAuth callback failed";

/// Create authentication router
///
/// Routes:
/// - GET /auth/config - Public login configuration
/// - POST /auth/guest - Guest login
/// - GET /auth/github/start - Redirect to GitHub
/// - GET /auth/github/callback - OAuth callback
/// - GET /auth/me - Current identity (attach)
/// - GET /auth/permissions - Permission set (require)
/// - POST /auth/logout - Revoke the session (require)
pub fn auth_router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/auth/config", get(login_config))
        .route("/auth/guest", post(guest_login))
        .route("/auth/github/start", get(github_start))
        .route("/auth/github/callback", get(github_callback));

    let attached = Router::new()
        .route("/auth/me", get(current_identity))
        .route_layer(middleware::from_fn_with_state(state.clone(), attach_session));

    let protected = Router::new()
        .route("/auth/permissions", get(current_permissions))
        .route("/auth/logout", post(logout))
        .route_layer(middleware::from_fn_with_state(state, require_auth));

    public.merge(attached).merge(protected)
}

// =============================================================================
// Responses
// =============================================================================

/// Body returned by a successful login
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    token: String,
    /// Epoch milliseconds
    expires_at: i64,
    permissions: PermissionSet,
    user: SessionUser,
}

impl From<&Session> for LoginResponse {
    fn from(session: &Session) -> Self {
        Self {
            token: session.token.clone(),
            expires_at: session.expires_at.timestamp_millis(),
            permissions: session.permissions.clone(),
            user: session.user.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginConfigResponse {
    github_client_id: Option<String>,
    github_callback_url: String,
    frontend_github_success_url: Option<String>,
    frontend_github_error_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IdentityResponse {
    user: SessionUser,
    #[serde(rename = "type")]
    kind: SessionKind,
    provider: AuthProvider,
    permissions: PermissionSet,
    expires_at: i64,
}

// =============================================================================
// Configuration & guest login
// =============================================================================

/// GET /auth/config
///
/// Never exposes the client secret.
async fn login_config(State(state): State<AppState>) -> Json<LoginConfigResponse> {
    let github = &state.config.auth.github;
    let frontend = &state.config.frontend;

    Json(LoginConfigResponse {
        github_client_id: Some(github.client_id.trim())
            .filter(|id| !id.is_empty())
            .map(ToOwned::to_owned),
        github_callback_url: github.callback_url.clone(),
        frontend_github_success_url: frontend.github_success_url.clone(),
        frontend_github_error_url: frontend.github_error_url.clone(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct GuestLoginRequest {
    #[serde(default)]
    name: Option<String>,
}

/// POST /auth/guest
///
/// The body is optional; a missing or blank name becomes "Guest".
async fn guest_login(
    State(state): State<AppState>,
    body: Option<Json<GuestLoginRequest>>,
) -> (StatusCode, Json<LoginResponse>) {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let name = guest_display_name(request.name.as_deref());

    let session = state
        .sessions
        .create(NewSession {
            kind: SessionKind::Guest,
            provider: AuthProvider::Guest,
            permissions: permissions_from_flags(CapabilityFlags::default()),
            user: SessionUser {
                id: format!("guest:{}", ulid::Ulid::new()),
                name,
                username: None,
                email: None,
                avatar_url: None,
                profile_url: None,
                role: Role::Guest,
                flags: CapabilityFlags::default(),
            },
            external_access_token: None,
            ttl: None,
        })
        .await;

    tracing::info!(user_id = %session.user.id, "Guest session issued");

    (StatusCode::CREATED, Json(LoginResponse::from(&session)))
}

fn guest_display_name(requested: Option<&str>) -> String {
    let name: String = requested
        .unwrap_or_default()
        .trim()
        .chars()
        .take(GUEST_NAME_MAX_CHARS)
        .collect();
    let name = name.trim_end();

    if name.is_empty() {
        "Guest".to_string()
    } else {
        name.to_string()
    }
}

// =============================================================================
// GitHub OAuth
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartQuery {
    #[serde(default)]
    frontend_redirect_url: Option<String>,
}

/// GET /auth/github/start
///
/// # Steps
/// 1. Fail fast without a client id
/// 2. Pick the post-login target (query or configured default)
/// 3. Register a handshake state
/// 4. Redirect to GitHub with client_id, redirect_uri, scope, state
async fn github_start(
    State(state): State<AppState>,
    Query(query): Query<StartQuery>,
) -> Result<Redirect> {
    let github = &state.config.auth.github;
    if github.client_id.trim().is_empty() {
        return Err(AppError::ConfigurationMissing(
            "GitHub OAuth client id is not configured".to_string(),
        ));
    }

    let target = query
        .frontend_redirect_url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .or_else(|| state.config.frontend.github_success_url.clone());

    if let Some(target) = &target {
        parse_http_url(target).ok_or_else(|| {
            AppError::Validation("frontendRedirectUrl must be an absolute http(s) URL".to_string())
        })?;
    }

    let handshake = state.oauth_states.create_state(target).await;
    let url = authorize_url(github, &handshake)?;

    tracing::debug!("Redirecting to GitHub authorization");
    Ok(Redirect::to(url.as_str()))
}

/// Query parameters from GitHub callback
#[derive(Debug, Deserialize)]
struct CallbackQuery {
    /// Authorization code
    #[serde(default)]
    code: Option<String>,
    /// Handshake state
    #[serde(default)]
    state: Option<String>,
}

/// GET /auth/github/callback
///
/// # Steps
/// 1. Require an authorization code
/// 2. Fail fast when GitHub is not configured
/// 3. Consume the handshake state
/// 4. Exchange code, fetch profile, resolve permissions
/// 5. Create session; redirect to the frontend or answer with JSON
async fn github_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response> {
    let code = query
        .code
        .filter(|code| !code.trim().is_empty())
        .ok_or_else(|| AppError::Validation("Missing GitHub OAuth code".to_string()))?;

    if !state.config.auth.github.is_configured() {
        return Err(AppError::ConfigurationMissing(
            "GitHub OAuth client id or secret is not configured".to_string(),
        ));
    }

    let handshake = state
        .oauth_states
        .consume_state(query.state.as_deref().unwrap_or_default())
        .await
        .ok_or(AppError::HandshakeInvalid)?;

    let session = match complete_github_login(&state, &code).await {
        Ok(session) => session,
        Err(AppError::Upstream(details)) => {
            tracing::warn!(%details, "GitHub OAuth callback failed");
            return match &state.config.frontend.github_error_url {
                Some(error_url) => Ok(redirect_with_params(
                    error_url,
                    &[("error", GITHUB_CALLBACK_FAILED)],
                )?
                .into_response()),
                None => Err(AppError::Upstream(format!(
                    "{GITHUB_CALLBACK_FAILED}: {details}"
                ))),
            };
        }
        Err(error) => return Err(error),
    };

    match handshake.frontend_redirect_url {
        Some(target) => {
            let expires_at = session.expires_at.timestamp_millis().to_string();
            let redirect = redirect_with_params(
                &target,
                &[
                    ("token", session.token.as_str()),
                    ("provider", session.provider.as_str()),
                    ("expiresAt", expires_at.as_str()),
                ],
            )?;
            Ok(redirect.into_response())
        }
        None => Ok(Json(LoginResponse::from(&session)).into_response()),
    }
}

/// Exchange `code`, enforce the allow-list and issue a GitHub session.
///
/// Configured admins receive the wildcard set regardless of any user record;
/// everyone else gets permissions derived from their record's flags.
async fn complete_github_login(state: &AppState, code: &str) -> Result<Session> {
    let access_token = state.identity_provider.exchange_code(code).await?;
    let github_user = state.identity_provider.fetch_user(&access_token).await?;
    let auth = &state.config.auth;

    if !auth.is_allowed(&github_user.login) {
        tracing::warn!(login = %github_user.login, "GitHub account not in allow-list");
        return Err(AppError::Forbidden(
            "This GitHub account is not allowed to access this application".to_string(),
        ));
    }

    let (role, flags, permissions) = if auth.is_admin(&github_user.login) {
        (
            Role::Admin,
            CapabilityFlags::all(),
            permissions_for_role(Role::Admin),
        )
    } else {
        let identity = state
            .users
            .find_capabilities(Some(&github_user.login), github_user.email.as_deref())
            .await;
        tracing::debug!(
            login = %github_user.login,
            matched = identity.matched,
            "Resolved GitHub identity"
        );
        (
            Role::User,
            identity.flags,
            permissions_from_flags(identity.flags),
        )
    };

    let session = state
        .sessions
        .create(NewSession {
            kind: SessionKind::User,
            provider: AuthProvider::Github,
            permissions,
            user: github_session_user(github_user, role, flags),
            external_access_token: Some(access_token),
            ttl: None,
        })
        .await;

    tracing::info!(
        user_id = %session.user.id,
        role = role.as_str(),
        "GitHub session issued"
    );

    Ok(session)
}

fn github_session_user(user: GitHubUser, role: Role, flags: CapabilityFlags) -> SessionUser {
    SessionUser {
        id: format!("github:{}", user.id),
        name: user
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| user.login.clone()),
        username: Some(user.login),
        email: user.email,
        avatar_url: user.avatar_url,
        profile_url: user.html_url,
        role,
        flags,
    }
}

fn parse_http_url(value: &str) -> Option<Url> {
    Url::parse(value)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

/// Redirect to `target` with `params` set on its query string.
fn redirect_with_params(target: &str, params: &[(&str, &str)]) -> Result<Redirect> {
    let mut url = parse_http_url(target)
        .ok_or_else(|| AppError::Config(format!("invalid redirect target: {target}")))?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !params.iter().any(|(name, _)| name == key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .extend_pairs(params.iter().copied());

    Ok(Redirect::to(url.as_str()))
}

// =============================================================================
// Current session
// =============================================================================

/// GET /auth/me
async fn current_identity(MaybeUser(session): MaybeUser) -> Result<Json<IdentityResponse>> {
    let session = session.ok_or(AppError::AuthenticationMissing)?;

    Ok(Json(IdentityResponse {
        expires_at: session.expires_at.timestamp_millis(),
        user: session.user,
        kind: session.kind,
        provider: session.provider,
        permissions: session.permissions,
    }))
}

/// GET /auth/permissions
async fn current_permissions(CurrentUser(session): CurrentUser) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "permissions": session.permissions }))
}

/// POST /auth/logout
///
/// Local revocation is authoritative. Revoking the GitHub grant runs in the
/// background and its failure is only logged.
async fn logout(State(state): State<AppState>, CurrentUser(session): CurrentUser) -> StatusCode {
    state.sessions.revoke(&session.token).await;
    tracing::info!(user_id = %session.user.id, "Session revoked");

    if session.provider == AuthProvider::Github && state.config.auth.github.is_configured() {
        if let Some(access_token) = session.external_access_token {
            let provider = state.identity_provider.clone();
            let user_id = session.user.id;

            tokio::spawn(async move {
                match provider.revoke_grant(&access_token).await {
                    Ok(()) => tracing::debug!(%user_id, "GitHub grant revoked"),
                    Err(error) => {
                        tracing::warn!(%error, %user_id, "Failed to revoke GitHub grant")
                    }
                }
            });
        }
    }

    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_name_defaults_and_truncates() {
        assert_eq!(guest_display_name(None), "Guest");
        assert_eq!(guest_display_name(Some("   ")), "Guest");
        assert_eq!(guest_display_name(Some("  Ann ")), "Ann");

        let long = "é".repeat(80);
        assert_eq!(guest_display_name(Some(&long)).chars().count(), 50);
    }

    #[test]
    fn redirect_params_replace_existing_keys() {
        let response =
            redirect_with_params("https://app.example.com/done?token=old&tab=1", &[("token", "new")])
                .unwrap()
                .into_response();

        let location = response
            .headers()
            .get(axum::http::header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(location, "https://app.example.com/done?tab=1&token=new");
    }

    #[test]
    fn only_http_urls_are_redirect_targets() {
        assert!(parse_http_url("https://app.example.com/cb").is_some());
        assert!(parse_http_url("javascript:alert(1)").is_none());
        assert!(parse_http_url("/relative/path").is_none());
    }

    #[test]
    fn github_user_name_falls_back_to_login() {
        let user = github_session_user(
            GitHubUser {
                login: "octocat".to_string(),
                id: 583231,
                name: None,
                email: None,
                avatar_url: None,
                html_url: Some("https://github.com/octocat".to_string()),
            },
            Role::User,
            CapabilityFlags::default(),
        );

        assert_eq!(user.id, "github:583231");
        assert_eq!(user.name, "octocat");
        assert_eq!(user.username.as_deref(), Some("octocat"));
    }
}
