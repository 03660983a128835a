//! User endpoints
//!
//! `/users/me` describes the caller. `/users` exposes the user directory for
//! administration and is gated by `users:manage`.

use axum::{
    Json, Router,
    extract::State,
    middleware,
    routing::get,
};
use serde::Serialize;

use crate::AppState;
use crate::auth::{
    CurrentUser, Permission, PermissionSet, SessionKind, SessionUser, UserRecord, require_auth,
    require_permission,
};
use crate::error::{AppError, Result};

/// Create users router
///
/// Routes:
/// - GET /users/me - Caller profile (require + profile:read)
/// - GET /users - List user records (require + users:manage)
/// - PUT /users - Replace user records (require + users:manage)
pub fn users_router(state: AppState) -> Router<AppState> {
    let profile = Router::new()
        .route("/users/me", get(current_profile))
        .route_layer(middleware::from_fn_with_state(
            Permission::ProfileRead,
            require_permission,
        ))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let directory = Router::new()
        .route("/users", get(list_users).put(replace_users))
        .route_layer(middleware::from_fn_with_state(
            Permission::UsersManage,
            require_permission,
        ))
        .route_layer(middleware::from_fn_with_state(state, require_auth));

    profile.merge(directory)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    user: SessionUser,
    session_type: SessionKind,
    permissions: PermissionSet,
}

/// GET /users/me
async fn current_profile(CurrentUser(session): CurrentUser) -> Json<ProfileResponse> {
    Json(ProfileResponse {
        user: session.user,
        session_type: session.kind,
        permissions: session.permissions,
    })
}

#[derive(Debug, Serialize)]
struct UserList {
    users: Vec<UserRecord>,
}

/// GET /users
async fn list_users(State(state): State<AppState>) -> Json<UserList> {
    Json(UserList {
        users: state.users.list().await,
    })
}

/// PUT /users
///
/// Accepts either a bare array of records or `{"users": [...]}`. Records
/// are normalized; those with neither email nor GitHub username are dropped.
async fn replace_users(
    State(state): State<AppState>,
    CurrentUser(session): CurrentUser,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<UserList>> {
    let entries = match &body {
        serde_json::Value::Array(entries) => entries,
        serde_json::Value::Object(object) => object
            .get("users")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| AppError::Validation("users must be an array".to_string()))?,
        _ => {
            return Err(AppError::Validation(
                "expected an array of user records".to_string(),
            ));
        }
    };

    let records = entries.iter().map(UserRecord::from_json).collect();
    let users = state.users.replace(records).await?;

    tracing::info!(
        user_id = %session.user.id,
        users = users.len(),
        "User directory updated"
    );

    Ok(Json(UserList { users }))
}
