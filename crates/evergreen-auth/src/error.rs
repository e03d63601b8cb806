//! Authentication error types.

use thiserror::Error;

/// Errors raised while authenticating against the identity provider.
#[derive(Debug, Error)]
pub enum AuthError {
    /// OIDC discovery document could not be fetched or parsed.
    #[error("Failed to fetch OIDC metadata from {issuer}: {message}")]
    Discovery { issuer: String, message: String },

    /// Network failure talking to the authorization server.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Request to the authorization server exceeded its timeout.
    ///
    /// Transient; distinct from a rejected grant.
    #[error("Request to {0} timed out")]
    Timeout(String),

    /// Server answered with something that is not a valid OAuth payload.
    #[error("Invalid response from authorization server: {0}")]
    InvalidResponse(String),

    /// Device authorization request was refused.
    #[error("Device authorization request failed: {0}")]
    DeviceAuthorization(String),

    /// Access token payload could not be decoded.
    #[error(
        "Token is malformed and cannot be decoded: {0}. \
         Please re-authenticate by removing your token file and restarting."
    )]
    MalformedToken(String),

    /// Access token decoded but carries no usable identity.
    #[error(
        "Token is missing required identity claims (email, preferred_username, sub). \
         Please re-authenticate by removing your token file and restarting."
    )]
    MissingIdentityClaims,

    /// Refresh requested without a refresh token.
    #[error("No refresh token available")]
    NoRefreshToken,

    /// Token endpoint rejected the refresh grant.
    #[error("Token refresh rejected ({status}): {error} - {description}")]
    RefreshRejected {
        status: u16,
        error: String,
        description: String,
    },

    /// Device code expired before the user approved it.
    #[error("Device code expired - please restart authentication")]
    DeviceCodeExpired,

    /// User did not approve within the polling ceiling.
    #[error("Device flow timed out after {0} seconds - please restart authentication")]
    DeviceFlowTimedOut(u64),

    /// Token endpoint returned a terminal error while polling.
    #[error(
        "Authentication failed: {error} - {description}. \
         Retry, or remove your token file and restart if this persists."
    )]
    DeviceFlowRejected { error: String, description: String },

    /// Shutdown was requested while waiting for the user.
    #[error("Authentication cancelled")]
    Cancelled,
}

impl AuthError {
    /// Network-level failures that a later strategy may recover from.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuthError::Http(_) | AuthError::Timeout(_) | AuthError::Discovery { .. }
        )
    }

    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AuthError::Timeout(url.to_string())
        } else {
            AuthError::Http(err.to_string())
        }
    }
}

impl From<AuthError> for evergreen_core::Error {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Http(msg) => evergreen_core::Error::Http(msg),
            AuthError::Timeout(url) => evergreen_core::Error::Timeout(url),
            other => evergreen_core::Error::Auth(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_errors_carry_remediation_hint() {
        for err in [
            AuthError::MalformedToken("bad base64".into()),
            AuthError::MissingIdentityClaims,
        ] {
            assert!(err.to_string().contains("removing your token file"));
        }
        let err = AuthError::DeviceFlowRejected {
            error: "access_denied".into(),
            description: "user said no".into(),
        };
        assert!(err.to_string().contains("access_denied"));
        assert!(err.to_string().contains("token file"));
    }

    #[test]
    fn test_is_transient() {
        assert!(AuthError::Timeout("https://idp.test/token".into()).is_transient());
        assert!(AuthError::Http("connection reset".into()).is_transient());
        assert!(!AuthError::DeviceCodeExpired.is_transient());
        assert!(!AuthError::MissingIdentityClaims.is_transient());
    }

    #[test]
    fn test_into_core_error() {
        let err: evergreen_core::Error = AuthError::Timeout("u".into()).into();
        assert!(matches!(err, evergreen_core::Error::Timeout(_)));

        let err: evergreen_core::Error = AuthError::NoRefreshToken.into();
        assert!(matches!(err, evergreen_core::Error::Auth(_)));
    }
}
