//! Token record as returned by the token endpoint and persisted to disk.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current wall-clock time as fractional epoch seconds.
pub(crate) fn now_epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// OAuth token response.
///
/// Fields this crate does not use (`id_token`, `scope`, ...) are kept in
/// `extra` so a load/save cycle does not drop them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Lifetime in seconds; providers send either integers or floats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<f64>,

    /// Absolute expiry in epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<f64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenRecord {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_in: None,
            expires_at: None,
            extra: Map::new(),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expires_in(mut self, seconds: u64) -> Self {
        self.expires_in = Some(seconds as f64);
        self
    }

    /// Fill in `expires_at` from `expires_in` if it is missing.
    pub fn normalized(self) -> Self {
        self.normalized_at(now_epoch_secs())
    }

    pub(crate) fn normalized_at(mut self, now: f64) -> Self {
        if self.expires_at.is_none() {
            if let Some(expires_in) = self.expires_in {
                self.expires_at = Some(now + expires_in);
            }
        }
        self
    }
}
