//! Authentication middleware
//!
//! Three guards, each a terminal check:
//! - attach: resolve a bearer token if one is present, never reject
//! - require: reject without a live session
//! - authorize: reject a session lacking a permission
//!
//! The checks are plain functions; the axum middleware and extractors below
//! are thin wrappers around them.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};

use super::permissions::Permission;
use super::session::{Session, SessionStore};
use crate::AppState;
use crate::error::AppError;

/// Bearer token from the `Authorization` header, if any.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(ToOwned::to_owned)
}

/// Attach: the caller's session, or `None` for anonymous or invalid tokens.
pub async fn resolve_optional(store: &dyn SessionStore, headers: &HeaderMap) -> Option<Session> {
    match extract_bearer_token(headers) {
        Some(token) => store.get(&token).await,
        None => None,
    }
}

/// Require: the caller's session or an authentication error.
pub async fn resolve_required(
    store: &dyn SessionStore,
    headers: &HeaderMap,
) -> Result<Session, AppError> {
    let token = extract_bearer_token(headers).ok_or(AppError::AuthenticationMissing)?;
    store
        .get(&token)
        .await
        .ok_or(AppError::AuthenticationInvalid)
}

/// Authorize: `session` must exist and hold `permission` (or the wildcard).
pub fn authorize(session: Option<&Session>, permission: Permission) -> Result<(), AppError> {
    let session = session.ok_or(AppError::AuthenticationMissing)?;

    if !session.allows(permission) {
        tracing::debug!(
            user_id = %session.user.id,
            required = permission.as_str(),
            "Permission denied"
        );
        return Err(AppError::MissingPermission(permission));
    }

    Ok(())
}

/// Middleware resolving an optional session
///
/// Inserts the `Session` into request extensions when the bearer token is
/// valid. Never rejects.
pub async fn attach_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(session) = resolve_optional(state.sessions.as_ref(), request.headers()).await {
        request.extensions_mut().insert(session);
    }

    next.run(request).await
}

/// Middleware to require authentication
///
/// Adds Session to request extensions if valid.
///
/// # Usage
/// ```ignore
/// let protected_routes = Router::new()
///     .route("/api/users", ...)
///     .route_layer(middleware::from_fn_with_state(state, require_auth));
/// ```
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let session = resolve_required(state.sessions.as_ref(), request.headers()).await?;
    request.extensions_mut().insert(session);

    Ok(next.run(request).await)
}

/// Middleware to require a permission
///
/// Must run after [`require_auth`]; the permission is the middleware state.
///
/// # Usage
/// ```ignore
/// let admin_routes = Router::new()
///     .route("/api/users", ...)
///     .route_layer(middleware::from_fn_with_state(Permission::UsersManage, require_permission))
///     .route_layer(middleware::from_fn_with_state(state, require_auth));
/// ```
pub async fn require_permission(
    State(permission): State<Permission>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    authorize(request.extensions().get::<Session>(), permission)?;
    Ok(next.run(request).await)
}

/// Extractor for current authenticated user
///
/// Rejects with 401 when there is no live session.
///
/// # Usage
/// ```ignore
/// async fn handler(
///     CurrentUser(session): CurrentUser,
/// ) -> impl IntoResponse {
///     format!("Hello, {}", session.user.name)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Session);

impl CurrentUser {
    /// Authorize the current session for `permission`.
    pub fn require(&self, permission: Permission) -> Result<(), AppError> {
        authorize(Some(&self.0), permission)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(session) = parts.extensions.get::<Session>().cloned() {
            return Ok(CurrentUser(session));
        }

        let state = AppState::from_ref(state);
        let session = resolve_required(state.sessions.as_ref(), &parts.headers).await?;
        parts.extensions.insert(session.clone());

        Ok(CurrentUser(session))
    }
}

/// Optional current user extractor
///
/// Returns None if not authenticated, instead of error.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<Session>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(session) = parts.extensions.get::<Session>().cloned() {
            return Ok(MaybeUser(Some(session)));
        }

        let app_state = AppState::from_ref(state);
        let session = resolve_optional(app_state.sessions.as_ref(), &parts.headers).await;

        if let Some(session) = &session {
            parts.extensions.insert(session.clone());
        }

        Ok(MaybeUser(session))
    }
}
