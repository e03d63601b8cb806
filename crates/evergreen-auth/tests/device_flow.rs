//! End-to-end login against a mocked identity provider.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use evergreen_auth::{AuthManager, AuthState, DeviceFlowOptions, TokenStore};
use evergreen_core::OAuthSettings;
use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;

fn access_token(email: &str, expires_in: u64) -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    let claims = json!({ "email": email, "exp": now + expires_in });
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

fn mock_discovery(server: &MockServer) {
    server.mock(|when, then| {
        when.method(GET).path("/.well-known/openid-configuration");
        then.status(200).json_body(json!({
            "issuer": server.base_url(),
            "token_endpoint": server.url("/token"),
            "device_authorization_endpoint": server.url("/device")
        }));
    });
}

fn manager(server: &MockServer, token_file: std::path::PathBuf) -> AuthManager {
    let settings = OAuthSettings::new(server.base_url(), "evergreen-cli").with_token_file(token_file);
    AuthManager::new(settings).with_options(DeviceFlowOptions {
        open_browser: false,
        max_wait: Duration::from_secs(10),
        ..DeviceFlowOptions::default()
    })
}

#[tokio::test]
async fn test_device_login_persists_tokens() {
    let server = MockServer::start();
    let dir = TempDir::new().unwrap();
    let token_file = dir.path().join("token.json");
    let token = access_token("jane.doe@example.com", 3600);

    mock_discovery(&server);
    let device = server.mock(|when, then| {
        when.method(POST)
            .path("/device")
            .body_includes("client_id=evergreen-cli");
        then.status(200).json_body(json!({
            "device_code": "dc-1",
            "user_code": "ABCD-EFGH",
            "verification_uri": "https://idp.test/activate",
            "interval": 0
        }));
    });
    let grant = server.mock(|when, then| {
        when.method(POST)
            .path("/token")
            .body_includes("device_code=dc-1");
        then.status(200).json_body(json!({
            "access_token": token,
            "refresh_token": "rt-1",
            "expires_in": 3600,
            "id_token": "idt"
        }));
    });

    let mut auth = manager(&server, token_file.clone());
    auth.ensure_authenticated().await.unwrap();

    device.assert();
    grant.assert();
    assert_eq!(auth.state(), AuthState::Authenticated);
    assert_eq!(auth.user_id(), Some("jane.doe"));
    assert!(auth.has_refresh_token());

    let saved = TokenStore::new(Some(token_file)).load().unwrap();
    assert_eq!(saved.access_token, token);
    assert_eq!(saved.refresh_token.as_deref(), Some("rt-1"));
    assert!(saved.expires_at.is_some());
    assert_eq!(saved.extra.get("id_token"), Some(&json!("idt")));
}

#[tokio::test]
async fn test_restart_refreshes_expired_session() {
    let server = MockServer::start();
    let dir = TempDir::new().unwrap();
    let token_file = dir.path().join("token.json");

    std::fs::write(
        &token_file,
        json!({
            "access_token": access_token("jane.doe@example.com", 0),
            "refresh_token": "rt-1",
            "expires_at": 1
        })
        .to_string(),
    )
    .unwrap();

    let fresh = access_token("jane.doe@example.com", 3600);
    mock_discovery(&server);
    let refresh = server.mock(|when, then| {
        when.method(POST)
            .path("/token")
            .body_includes("grant_type=refresh_token")
            .body_includes("refresh_token=rt-1");
        then.status(200).json_body(json!({
            "access_token": fresh,
            "expires_in": 3600
        }));
    });

    let mut auth = manager(&server, token_file.clone());
    auth.ensure_authenticated().await.unwrap();

    refresh.assert_calls(1);
    assert_eq!(auth.access_token(), Some(fresh.as_str()));

    let saved = TokenStore::new(Some(token_file)).load().unwrap();
    assert_eq!(saved.refresh_token.as_deref(), Some("rt-1"));
}

#[tokio::test]
async fn test_denied_login_is_reported() {
    let server = MockServer::start();
    let dir = TempDir::new().unwrap();

    mock_discovery(&server);
    server.mock(|when, then| {
        when.method(POST).path("/device");
        then.status(200).json_body(json!({
            "device_code": "dc-1",
            "verification_uri": "https://idp.test/activate",
            "interval": 0
        }));
    });
    server.mock(|when, then| {
        when.method(POST).path("/token");
        then.status(400).json_body(json!({
            "error": "access_denied",
            "error_description": "The user denied the request"
        }));
    });

    let mut auth = manager(&server, dir.path().join("token.json"));
    let err = auth.ensure_authenticated().await.unwrap_err();

    assert!(err.to_string().contains("access_denied"));
    assert_eq!(auth.state(), AuthState::Unauthenticated);
    assert!(!dir.path().join("token.json").exists());
}
