//! E2E tests for the GitHub OAuth redirect and callback

mod common;

use common::{
    FakeGitHub, TestServer, location_of, permissions_of, query_param, token_of,
};
use serde_json::Value;

#[tokio::test]
async fn test_start_redirects_to_github_with_state() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/api/auth/github/start"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 303);

    let location = location_of(&response);
    assert!(location.starts_with("https://github.com/login/oauth/authorize?"));
    assert_eq!(
        query_param(&location, "client_id").as_deref(),
        Some("test-client-id")
    );
    assert_eq!(
        query_param(&location, "redirect_uri").as_deref(),
        Some("http://localhost:8091/api/auth/github/callback")
    );
    assert_eq!(
        query_param(&location, "scope").as_deref(),
        Some("read:user user:email")
    );
    assert!(query_param(&location, "state").is_some());
    assert!(!location.contains("test-client-secret"));

    assert_eq!(server.state.oauth_states.pending().await, 1);
}

#[tokio::test]
async fn test_start_rejects_non_http_frontend_target() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/api/auth/github/start"))
        .query(&[("frontendRedirectUrl", "javascript:alert(1)")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(server.state.oauth_states.pending().await, 0);
}

#[tokio::test]
async fn test_start_without_client_id_fails_fast() {
    let server = TestServer::with_config(|config| {
        config.auth.github.client_id.clear();
    })
    .await;

    let response = server
        .client
        .get(server.url("/api/auth/github/start"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reason"], "configuration_missing");
}

#[tokio::test]
async fn test_callback_requires_code() {
    let server = TestServer::new().await;
    let state = server.start_github_login(None).await;

    let response = server
        .client
        .get(server.url("/api/auth/github/callback"))
        .query(&[("state", state.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reason"], "validation");
}

#[tokio::test]
async fn test_callback_with_unknown_state_creates_no_session() {
    let server = TestServer::new().await;

    let response = server.github_callback("admin-code", "forged-state").await;
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reason"], "invalid_oauth_state");
    assert_eq!(server.state.sessions.count().await, 0);
}

#[tokio::test]
async fn test_callback_state_is_single_use() {
    let server = TestServer::new().await;
    let state = server.start_github_login(None).await;

    let first = server.github_callback("editor-code", &state).await;
    assert_eq!(first.status(), 200);

    let replay = server.github_callback("editor-code", &state).await;
    assert_eq!(replay.status(), 400);
    let body: Value = replay.json().await.unwrap();
    assert_eq!(body["reason"], "invalid_oauth_state");

    assert_eq!(server.state.sessions.count().await, 1);
}

#[tokio::test]
async fn test_admin_login_gets_wildcard_regardless_of_flags() {
    let server = TestServer::new().await;

    let body = server.github_login("admin-code").await;

    assert!(token_of(&body).starts_with("user_"));
    assert_eq!(permissions_of(&body["permissions"]), vec!["*"]);
    assert_eq!(body["user"]["role"], "admin");
    assert_eq!(body["user"]["id"], "github:1000");
    assert_eq!(body["user"]["username"], "Octocat");
    assert_eq!(body["user"]["canEdit"], true);
    assert_eq!(body["user"]["canPublish"], true);
    assert!(body.get("externalAccessToken").is_none());
}

#[tokio::test]
async fn test_user_login_derives_permissions_from_record_flags() {
    let server = TestServer::new().await;

    let editor = server.github_login("editor-code").await;
    assert_eq!(editor["user"]["role"], "user");
    assert_eq!(editor["user"]["canEdit"], true);
    assert_eq!(
        permissions_of(&editor["permissions"]),
        vec!["documents:edit", "documents:read", "profile:read"]
    );

    // Matched by email, case-insensitively
    let publisher = server.github_login("publisher-code").await;
    assert_eq!(
        permissions_of(&publisher["permissions"]),
        vec![
            "documents:publish",
            "documents:read",
            "documents:validate",
            "profile:read"
        ]
    );

    let stranger = server.github_login("stranger-code").await;
    assert_eq!(stranger["user"]["canEdit"], false);
    assert_eq!(
        permissions_of(&stranger["permissions"]),
        vec!["documents:read", "profile:read"]
    );
}

#[tokio::test]
async fn test_allow_list_rejects_other_accounts() {
    let server = TestServer::with_config(|config| {
        config.auth.allowed_users = vec!["edith".to_string()];
    })
    .await;

    let state = server.start_github_login(None).await;
    let response = server.github_callback("stranger-code", &state).await;
    assert_eq!(response.status(), 403);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reason"], "forbidden");
    assert_eq!(server.state.sessions.count().await, 0);

    server.github_login("editor-code").await;
    assert_eq!(server.state.sessions.count().await, 1);
}

#[tokio::test]
async fn test_callback_redirects_to_frontend_with_token() {
    let server = TestServer::new().await;
    let state = server
        .start_github_login(Some("https://app.example.com/done?tab=docs"))
        .await;

    let response = server.github_callback("editor-code", &state).await;
    assert_eq!(response.status(), 303);

    let location = location_of(&response);
    assert!(location.starts_with("https://app.example.com/done?"));
    assert_eq!(query_param(&location, "tab").as_deref(), Some("docs"));
    assert_eq!(query_param(&location, "provider").as_deref(), Some("github"));

    let token = query_param(&location, "token").expect("token param");
    assert!(token.starts_with("user_"));
    let expires_at: i64 = query_param(&location, "expiresAt")
        .expect("expiresAt param")
        .parse()
        .unwrap();
    assert!(expires_at > chrono::Utc::now().timestamp_millis());

    let me = server.get_with_token("/api/auth/me", &token).await;
    assert_eq!(me.status(), 200);
}

#[tokio::test]
async fn test_configured_success_url_is_default_target() {
    let server = TestServer::with_config(|config| {
        config.frontend.github_success_url = Some("https://app.example.com/welcome".to_string());
    })
    .await;

    let state = server.start_github_login(None).await;
    let response = server.github_callback("editor-code", &state).await;
    assert_eq!(response.status(), 303);
    assert!(location_of(&response).starts_with("https://app.example.com/welcome?"));
}

#[tokio::test]
async fn test_upstream_failure_returns_bad_gateway() {
    let server = TestServer::new().await;
    let state = server.start_github_login(None).await;

    let response = server.github_callback("expired-code", &state).await;
    assert_eq!(response.status(), 502);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reason"], "upstream");
    assert!(
        body["details"]
            .as_str()
            .unwrap()
            .contains("GitHub OAuth callback failed")
    );
    assert!(!body.to_string().contains("test-client-secret"));
    assert_eq!(server.state.sessions.count().await, 0);
}

#[tokio::test]
async fn test_upstream_failure_redirects_to_error_url() {
    let server = TestServer::with_config(|config| {
        config.frontend.github_error_url = Some("https://app.example.com/login-failed".to_string());
    })
    .await;
    let state = server.start_github_login(None).await;

    let response = server.github_callback("expired-code", &state).await;
    assert_eq!(response.status(), 303);

    let location = location_of(&response);
    assert!(location.starts_with("https://app.example.com/login-failed?"));
    assert_eq!(
        query_param(&location, "error").as_deref(),
        Some("GitHub OAuth callback failed")
    );
}

#[tokio::test]
async fn test_unconfigured_callback_keeps_state() {
    let server = TestServer::with_config(|config| {
        config.auth.github.client_secret.clear();
    })
    .await;
    let state = server.start_github_login(None).await;

    let response = server.github_callback("editor-code", &state).await;
    assert_eq!(response.status(), 500);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reason"], "configuration_missing");
    assert_eq!(server.state.oauth_states.pending().await, 1);
}

#[tokio::test]
async fn test_logout_revokes_github_grant_in_background() {
    let server = TestServer::new().await;
    let token = server.github_token("editor-code").await;

    let response = server
        .client
        .post(server.url("/api/auth/logout"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(server.github.revoked(), vec!["gho_editor-code".to_string()]);
}

#[tokio::test]
async fn test_logout_succeeds_when_grant_revocation_fails() {
    let server = TestServer::build(|_| {}, FakeGitHub::standard().failing_revocation()).await;
    let token = server.github_token("editor-code").await;

    let response = server
        .client
        .post(server.url("/api/auth/logout"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let after = server.get_with_token("/api/auth/permissions", &token).await;
    assert_eq!(after.status(), 401);

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(server.github.revoked().len(), 1);
}

#[tokio::test]
async fn test_guest_logout_does_not_contact_github() {
    let server = TestServer::new().await;
    let token = server.guest_token().await;

    let response = server
        .client
        .post(server.url("/api/auth/logout"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(server.github.revoked().is_empty());
}
