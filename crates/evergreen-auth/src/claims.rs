//! Unverified JWT claim reader.
//!
//! The identity provider already validated the token when it was issued;
//! here we only need the expiry and identity claims, so the signature is
//! never checked.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

use crate::error::AuthError;
use crate::token::now_epoch_secs;

/// Tokens expiring within this many seconds are treated as expired.
pub const EXPIRY_BUFFER_SECS: f64 = 60.0;

/// Claims this crate reads from an access token.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub exp: Option<f64>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
}

impl Claims {
    /// User identity: email local-part, then `preferred_username`, then `sub`.
    pub fn identity(&self) -> Option<String> {
        fn non_empty(s: &Option<String>) -> Option<&str> {
            s.as_deref().filter(|v| !v.is_empty())
        }

        if let Some(email) = non_empty(&self.email) {
            if let Some((local, _)) = email.split_once('@') {
                if !local.is_empty() {
                    return Some(local.to_string());
                }
            }
        }

        non_empty(&self.preferred_username)
            .or_else(|| non_empty(&self.sub))
            .map(str::to_string)
    }
}

/// Result of an expiry check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    /// More than [`EXPIRY_BUFFER_SECS`] remain.
    pub is_valid: bool,
    /// Raw seconds until `exp`, negative once expired.
    pub seconds_remaining: i64,
}

impl Expiry {
    const UNKNOWN: Expiry = Expiry {
        is_valid: false,
        seconds_remaining: 0,
    };
}

/// Decode the payload segment of a JWT without verifying it.
pub fn decode_claims(token: &str) -> Result<Claims, AuthError> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(AuthError::MalformedToken(
            "expected three dot-separated segments".into(),
        ));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::MalformedToken(format!("invalid base64 payload: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::MalformedToken(format!("invalid claims JSON: {}", e)))
}

/// Check whether `token` is still usable right now.
///
/// Never fails: an undecodable token or one without `exp` is simply invalid.
pub fn check_expiry(token: &str) -> Expiry {
    check_expiry_at(token, now_epoch_secs())
}

/// [`check_expiry`] against an explicit clock.
pub fn check_expiry_at(token: &str, now: f64) -> Expiry {
    let exp = match decode_claims(token) {
        Ok(Claims { exp: Some(exp), .. }) => exp,
        _ => return Expiry::UNKNOWN,
    };

    let remaining = exp - now;
    Expiry {
        is_valid: remaining > EXPIRY_BUFFER_SECS,
        seconds_remaining: remaining as i64,
    }
}

/// Read the user identity from an access token.
pub fn extract_identity(token: &str) -> Result<String, AuthError> {
    decode_claims(token)?
        .identity()
        .ok_or(AuthError::MissingIdentityClaims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn jwt(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{}.{}.sig", header, payload)
    }

    #[test]
    fn test_expiry_buffer() {
        let now = 1_700_000_000.0;
        let token = jwt(json!({ "exp": now + 3600.0 }));
        assert_eq!(
            check_expiry_at(&token, now),
            Expiry { is_valid: true, seconds_remaining: 3600 }
        );

        // inside the buffer: not valid, but remaining is still reported raw
        let token = jwt(json!({ "exp": now + 30.0 }));
        assert_eq!(
            check_expiry_at(&token, now),
            Expiry { is_valid: false, seconds_remaining: 30 }
        );

        let token = jwt(json!({ "exp": now + 60.0 }));
        assert!(!check_expiry_at(&token, now).is_valid);

        let token = jwt(json!({ "exp": now - 10.0 }));
        assert_eq!(check_expiry_at(&token, now).seconds_remaining, -10);
    }

    #[test]
    fn test_expiry_never_fails() {
        assert_eq!(check_expiry("not-a-jwt"), Expiry::UNKNOWN);
        assert_eq!(check_expiry("a.!!!.c"), Expiry::UNKNOWN);
        assert_eq!(check_expiry(&jwt(json!({ "sub": "x" }))), Expiry::UNKNOWN);
        assert_eq!(check_expiry(""), Expiry::UNKNOWN);
    }

    #[test]
    fn test_padded_payload_is_accepted() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"sub":"abcd"}"#);
        assert!(payload.ends_with('='));
        let token = format!("h.{}.s", payload);
        assert_eq!(extract_identity(&token).unwrap(), "abcd");
    }

    #[test]
    fn test_identity_order() {
        let token = jwt(json!({
            "email": "jane.doe@example.com",
            "preferred_username": "jdoe",
            "sub": "abc"
        }));
        assert_eq!(extract_identity(&token).unwrap(), "jane.doe");

        // email without '@' is skipped
        let token = jwt(json!({ "email": "jane", "preferred_username": "jdoe" }));
        assert_eq!(extract_identity(&token).unwrap(), "jdoe");

        // empty local part is skipped too
        let token = jwt(json!({ "email": "@example.com", "preferred_username": "jdoe" }));
        assert_eq!(extract_identity(&token).unwrap(), "jdoe");

        let token = jwt(json!({ "sub": "abc" }));
        assert_eq!(extract_identity(&token).unwrap(), "abc");
    }

    #[test]
    fn test_missing_identity() {
        let err = extract_identity(&jwt(json!({ "exp": 1 }))).unwrap_err();
        assert!(matches!(err, AuthError::MissingIdentityClaims));

        let err = extract_identity(&jwt(json!({ "email": "", "sub": "" }))).unwrap_err();
        assert!(matches!(err, AuthError::MissingIdentityClaims));
    }

    #[test]
    fn test_malformed_token() {
        for token in ["only.two", "a.b.c.d", "h.%%%.s"] {
            let err = extract_identity(token).unwrap_err();
            assert!(matches!(err, AuthError::MalformedToken(_)), "{}", token);
        }

        // valid base64, not JSON
        let token = format!("h.{}.s", URL_SAFE_NO_PAD.encode("hello"));
        assert!(matches!(
            extract_identity(&token),
            Err(AuthError::MalformedToken(_))
        ));
    }
}
