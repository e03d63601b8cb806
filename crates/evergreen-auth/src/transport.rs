//! HTTP exchanges with the OIDC identity provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::error::AuthError;
use crate::token::TokenRecord;

/// Per-request timeout for every call to the identity provider.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// RFC 8628 grant type.
pub const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Scopes requested during the device flow.
pub const DEFAULT_SCOPE: &str = "openid profile email groups offline_access";

/// Subset of the OIDC discovery document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    #[serde(default)]
    pub issuer: Option<String>,
    pub token_endpoint: String,
    #[serde(default)]
    pub device_authorization_endpoint: Option<String>,
}

/// RFC 8628 device authorization response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    #[serde(default)]
    pub user_code: Option<String>,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    #[serde(default = "default_interval", deserialize_with = "whole_seconds")]
    pub interval: u64,
    #[serde(default, deserialize_with = "optional_whole_seconds")]
    pub expires_in: Option<u64>,
}

fn default_interval() -> u64 {
    5
}

/// Accept integer or fractional seconds, rounding up.
fn whole_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let seconds = f64::deserialize(deserializer)?;
    Ok(seconds.max(0.0).ceil() as u64)
}

fn optional_whole_seconds<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u64>, D::Error> {
    let seconds = Option::<f64>::deserialize(deserializer)?;
    Ok(seconds.map(|s| s.max(0.0).ceil() as u64))
}

impl DeviceAuthorization {
    /// URL to show the user, preferring the one with the code embedded.
    pub fn verification_url(&self) -> &str {
        self.verification_uri_complete
            .as_deref()
            .unwrap_or(&self.verification_uri)
    }
}

/// Error body from the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenError {
    pub status: u16,
    pub error: String,
    pub description: String,
}

impl TokenError {
    /// Parse an OAuth error body, tolerating non-JSON responses.
    pub fn from_body(status: u16, body: &str) -> Self {
        #[derive(Deserialize)]
        struct Body {
            error: Option<String>,
            error_description: Option<String>,
        }

        match serde_json::from_str::<Body>(body) {
            Ok(parsed) => Self {
                status,
                error: parsed.error.unwrap_or_else(|| "unknown_error".to_string()),
                description: parsed.error_description.unwrap_or_default(),
            },
            Err(_) => Self {
                status,
                error: "unknown_error".to_string(),
                description: body.to_string(),
            },
        }
    }
}

/// Outcome of a token endpoint call that reached the server.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenResponse {
    Granted(TokenRecord),
    Rejected(TokenError),
}

/// Transport to the identity provider.
///
/// `Err` is reserved for failures to get an answer at all (network,
/// timeout, unparsable success body); protocol-level refusals come back as
/// [`TokenResponse::Rejected`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OAuthTransport: Send + Sync {
    /// Fetch `{issuer}/.well-known/openid-configuration`.
    async fn discover_metadata(&self, issuer: &str) -> Result<ProviderMetadata, AuthError>;

    /// Start a device authorization.
    async fn request_device_code(
        &self,
        endpoint: &str,
        client_id: &str,
        scope: &str,
    ) -> Result<DeviceAuthorization, AuthError>;

    /// Exchange a device code for tokens (one poll).
    async fn poll_for_token(
        &self,
        token_endpoint: &str,
        device_code: &str,
        client_id: &str,
    ) -> Result<TokenResponse, AuthError>;

    /// Exchange a refresh token for new tokens.
    async fn refresh_token(
        &self,
        token_endpoint: &str,
        refresh_token: &str,
        client_id: &str,
    ) -> Result<TokenResponse, AuthError>;
}

/// [`OAuthTransport`] over reqwest.
#[derive(Debug, Clone, Default)]
pub struct HttpOAuthTransport {
    client: reqwest::Client,
}

impl HttpOAuthTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn token_request(
        &self,
        token_endpoint: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, AuthError> {
        let response = self
            .client
            .post(token_endpoint)
            .timeout(HTTP_TIMEOUT)
            .form(form)
            .send()
            .await
            .map_err(|e| AuthError::from_reqwest(token_endpoint, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::from_reqwest(token_endpoint, e))?;

        if status == StatusCode::OK {
            let record: TokenRecord = serde_json::from_str(&body).map_err(|e| {
                AuthError::InvalidResponse(format!("token response is not valid: {}", e))
            })?;
            return Ok(TokenResponse::Granted(record.normalized()));
        }

        let error = TokenError::from_body(status.as_u16(), &body);
        debug!(status = error.status, error = %error.error, "Token endpoint refused request");
        Ok(TokenResponse::Rejected(error))
    }
}

#[async_trait]
impl OAuthTransport for HttpOAuthTransport {
    async fn discover_metadata(&self, issuer: &str) -> Result<ProviderMetadata, AuthError> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );
        debug!(url = %url, "Fetching OIDC discovery document");

        let discovery_error = |message: String| AuthError::Discovery {
            issuer: issuer.to_string(),
            message,
        };

        let response = self
            .client
            .get(&url)
            .timeout(HTTP_TIMEOUT)
            .send()
            .await
            .map_err(|e| match AuthError::from_reqwest(&url, e) {
                AuthError::Timeout(url) => AuthError::Timeout(url),
                other => discovery_error(other.to_string()),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "OIDC discovery failed");
            return Err(discovery_error(format!("HTTP {}: {}", status, body)));
        }

        response
            .json::<ProviderMetadata>()
            .await
            .map_err(|e| discovery_error(format!("invalid discovery document: {}", e)))
    }

    async fn request_device_code(
        &self,
        endpoint: &str,
        client_id: &str,
        scope: &str,
    ) -> Result<DeviceAuthorization, AuthError> {
        let response = self
            .client
            .post(endpoint)
            .timeout(HTTP_TIMEOUT)
            .form(&[("client_id", client_id), ("scope", scope)])
            .send()
            .await
            .map_err(|e| AuthError::from_reqwest(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::DeviceAuthorization(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        response.json::<DeviceAuthorization>().await.map_err(|e| {
            AuthError::InvalidResponse(format!("device authorization response: {}", e))
        })
    }

    async fn poll_for_token(
        &self,
        token_endpoint: &str,
        device_code: &str,
        client_id: &str,
    ) -> Result<TokenResponse, AuthError> {
        self.token_request(
            token_endpoint,
            &[
                ("grant_type", DEVICE_CODE_GRANT),
                ("device_code", device_code),
                ("client_id", client_id),
            ],
        )
        .await
    }

    async fn refresh_token(
        &self,
        token_endpoint: &str,
        refresh_token: &str,
        client_id: &str,
    ) -> Result<TokenResponse, AuthError> {
        self.token_request(
            token_endpoint,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client_id),
            ],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_error_from_json() {
        let err = TokenError::from_body(
            400,
            r#"{"error":"authorization_pending","error_description":"waiting"}"#,
        );
        assert_eq!(err.error, "authorization_pending");
        assert_eq!(err.description, "waiting");

        let err = TokenError::from_body(400, r#"{"error_description":"??"}"#);
        assert_eq!(err.error, "unknown_error");
    }

    #[test]
    fn test_token_error_from_text() {
        let err = TokenError::from_body(502, "Bad Gateway");
        assert_eq!(err.status, 502);
        assert_eq!(err.error, "unknown_error");
        assert_eq!(err.description, "Bad Gateway");
    }

    #[test]
    fn test_verification_url_prefers_complete() {
        let mut auth: DeviceAuthorization = serde_json::from_str(
            r#"{"device_code":"dc","user_code":"ABCD","verification_uri":"https://idp.test/device"}"#,
        )
        .unwrap();
        assert_eq!(auth.interval, 5);
        assert_eq!(auth.verification_url(), "https://idp.test/device");

        auth.verification_uri_complete = Some("https://idp.test/device?code=ABCD".into());
        assert_eq!(auth.verification_url(), "https://idp.test/device?code=ABCD");
    }

    #[test]
    fn test_device_authorization_fractional_seconds() {
        let auth: DeviceAuthorization = serde_json::from_str(
            r#"{"device_code":"dc","verification_uri":"https://idp.test/device","interval":2.5,"expires_in":599.9}"#,
        )
        .unwrap();
        assert_eq!(auth.interval, 3);
        assert_eq!(auth.expires_in, Some(600));
    }

    mod integration {
        use super::*;
        use httpmock::prelude::*;
        use serde_json::json;

        #[tokio::test]
        async fn test_discover_metadata() {
            let server = MockServer::start();
            let mock = server.mock(|when, then| {
                when.method(GET).path("/.well-known/openid-configuration");
                then.status(200).json_body(json!({
                    "issuer": server.base_url(),
                    "token_endpoint": server.url("/token"),
                    "device_authorization_endpoint": server.url("/device"),
                    "jwks_uri": server.url("/keys")
                }));
            });

            let transport = HttpOAuthTransport::new();
            let metadata = transport
                .discover_metadata(&format!("{}/", server.base_url()))
                .await
                .unwrap();

            mock.assert();
            assert_eq!(metadata.token_endpoint, server.url("/token"));
            assert_eq!(
                metadata.device_authorization_endpoint,
                Some(server.url("/device"))
            );
        }

        #[tokio::test]
        async fn test_discover_metadata_failure() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(GET).path("/.well-known/openid-configuration");
                then.status(500).body("boom");
            });

            let err = HttpOAuthTransport::new()
                .discover_metadata(&server.base_url())
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::Discovery { .. }));
        }

        #[tokio::test]
        async fn test_request_device_code() {
            let server = MockServer::start();
            let mock = server.mock(|when, then| {
                when.method(POST)
                    .path("/device")
                    .body_includes("client_id=evergreen-cli")
                    .body_includes("offline_access");
                then.status(200).json_body(json!({
                    "device_code": "dc-1",
                    "user_code": "WXYZ-1234",
                    "verification_uri": "https://idp.test/activate",
                    "verification_uri_complete": "https://idp.test/activate?user_code=WXYZ-1234",
                    "expires_in": 600,
                    "interval": 2
                }));
            });

            let auth = HttpOAuthTransport::new()
                .request_device_code(&server.url("/device"), "evergreen-cli", DEFAULT_SCOPE)
                .await
                .unwrap();

            mock.assert();
            assert_eq!(auth.device_code, "dc-1");
            assert_eq!(auth.interval, 2);
        }

        #[tokio::test]
        async fn test_request_device_code_refused() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(POST).path("/device");
                then.status(400).json_body(json!({ "error": "invalid_client" }));
            });

            let err = HttpOAuthTransport::new()
                .request_device_code(&server.url("/device"), "nope", DEFAULT_SCOPE)
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::DeviceAuthorization(_)));
        }

        #[tokio::test]
        async fn test_poll_pending_then_granted() {
            let server = MockServer::start();
            let mut pending = server.mock(|when, then| {
                when.method(POST)
                    .path("/token")
                    .body_includes("device_code=dc-1");
                then.status(400).json_body(json!({ "error": "authorization_pending" }));
            });

            let transport = HttpOAuthTransport::new();
            let response = transport
                .poll_for_token(&server.url("/token"), "dc-1", "cid")
                .await
                .unwrap();
            assert_eq!(
                response,
                TokenResponse::Rejected(TokenError {
                    status: 400,
                    error: "authorization_pending".into(),
                    description: String::new(),
                })
            );
            pending.assert();
            pending.delete();

            server.mock(|when, then| {
                when.method(POST).path("/token");
                then.status(200).json_body(json!({
                    "access_token": "at",
                    "refresh_token": "rt",
                    "expires_in": 3600,
                    "token_type": "Bearer"
                }));
            });

            let response = transport
                .poll_for_token(&server.url("/token"), "dc-1", "cid")
                .await
                .unwrap();
            let TokenResponse::Granted(record) = response else {
                panic!("expected granted, got {:?}", response);
            };
            assert_eq!(record.access_token, "at");
            assert!(record.expires_at.is_some());
        }

        #[tokio::test]
        async fn test_grant_with_fractional_expires_in() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(POST).path("/token");
                then.status(200).json_body(json!({
                    "access_token": "at",
                    "refresh_token": "rt",
                    "expires_in": 3599.5
                }));
            });

            let response = HttpOAuthTransport::new()
                .poll_for_token(&server.url("/token"), "dc-1", "cid")
                .await
                .unwrap();
            let TokenResponse::Granted(record) = response else {
                panic!("expected granted, got {:?}", response);
            };
            assert_eq!(record.expires_in, Some(3599.5));
            assert_eq!(record.refresh_token.as_deref(), Some("rt"));
            assert!(record.expires_at.is_some());
        }

        #[tokio::test]
        async fn test_refresh_rejected() {
            let server = MockServer::start();
            let mock = server.mock(|when, then| {
                when.method(POST)
                    .path("/token")
                    .body_includes("grant_type=refresh_token")
                    .body_includes("refresh_token=rt-old");
                then.status(400).json_body(json!({
                    "error": "invalid_grant",
                    "error_description": "refresh token revoked"
                }));
            });

            let response = HttpOAuthTransport::new()
                .refresh_token(&server.url("/token"), "rt-old", "cid")
                .await
                .unwrap();

            mock.assert();
            let TokenResponse::Rejected(err) = response else {
                panic!("expected rejection");
            };
            assert_eq!(err.error, "invalid_grant");
            assert_eq!(err.description, "refresh token revoked");
        }

        #[tokio::test]
        async fn test_unparsable_success_body() {
            let server = MockServer::start();
            server.mock(|when, then| {
                when.method(POST).path("/token");
                then.status(200).body("<html>login</html>");
            });

            let err = HttpOAuthTransport::new()
                .refresh_token(&server.url("/token"), "rt", "cid")
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidResponse(_)));
        }
    }
}
