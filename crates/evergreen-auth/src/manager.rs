//! Authentication state machine.
//!
//! [`AuthManager::ensure_authenticated`] tries, in order: the in-memory
//! token, the token file, a refresh grant, and finally the interactive
//! device flow. Every token is decoded before it is adopted, so a bad
//! response from the provider never replaces a working session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use evergreen_core::{OAuthSettings, TokenRefresher};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::claims::{check_expiry, extract_identity};
use crate::device_flow::{DevicePoll, DEFAULT_MAX_WAIT};
use crate::error::AuthError;
use crate::store::TokenStore;
use crate::token::TokenRecord;
use crate::transport::{
    DeviceAuthorization, HttpOAuthTransport, OAuthTransport, ProviderMetadata, TokenResponse,
    DEFAULT_SCOPE,
};

/// Where the manager is in the authentication sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    CheckingCache,
    Refreshing,
    DeviceFlowPending,
    Authenticated,
}

/// Tunables for the interactive device flow.
#[derive(Debug, Clone)]
pub struct DeviceFlowOptions {
    pub scope: String,
    pub max_wait: Duration,
    /// Try to open the verification URL in a browser.
    pub open_browser: bool,
}

impl Default for DeviceFlowOptions {
    fn default() -> Self {
        Self {
            scope: DEFAULT_SCOPE.to_string(),
            max_wait: DEFAULT_MAX_WAIT,
            open_browser: true,
        }
    }
}

/// Owns the OIDC session for one user.
pub struct AuthManager {
    settings: OAuthSettings,
    transport: Box<dyn OAuthTransport>,
    store: TokenStore,
    options: DeviceFlowOptions,
    cancel: CancellationToken,
    metadata: Option<ProviderMetadata>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    user_id: Option<String>,
    state: AuthState,
}

impl AuthManager {
    /// Manager talking to the real identity provider.
    pub fn new(settings: OAuthSettings) -> Self {
        Self::with_transport(settings, HttpOAuthTransport::new())
    }

    pub fn with_transport(settings: OAuthSettings, transport: impl OAuthTransport + 'static) -> Self {
        let store = TokenStore::new(settings.token_file.clone());
        Self {
            settings,
            transport: Box::new(transport),
            store,
            options: DeviceFlowOptions::default(),
            cancel: CancellationToken::new(),
            metadata: None,
            access_token: None,
            refresh_token: None,
            user_id: None,
            state: AuthState::Unauthenticated,
        }
    }

    pub fn with_options(mut self, options: DeviceFlowOptions) -> Self {
        self.options = options;
        self
    }

    /// Abort a pending device flow when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Make sure a valid access token is held, authenticating if needed.
    pub async fn ensure_authenticated(&mut self) -> Result<(), AuthError> {
        info!("Checking authentication status");

        if let Some(token) = self.access_token.as_deref() {
            if check_expiry(token).is_valid {
                debug!("In-memory token still valid");
                self.state = AuthState::Authenticated;
                return Ok(());
            }
            debug!("In-memory token expired");
        }

        if let Some(record) = self.check_token_file() {
            match extract_identity(&record.access_token) {
                Ok(user_id) => {
                    info!(user = %user_id, "Using cached token");
                    let refresh_token = record.refresh_token.or_else(|| self.refresh_token.take());
                    self.adopt(record.access_token, refresh_token, user_id);
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "Cached token is unusable");
                    if record.refresh_token.is_some() {
                        self.refresh_token = record.refresh_token;
                    }
                }
            }
        }

        if self.refresh_token.is_some() {
            info!("Attempting token refresh");
            match self.refresh().await {
                Ok(_) => return Ok(()),
                Err(e) => warn!(error = %e, "Token refresh failed, falling back to device flow"),
            }
        }

        warn!("No valid token found, authentication required");
        self.device_flow().await.map(|_| ())
    }

    /// Look for a usable token in the token file.
    ///
    /// Returns the record only if its access token is still valid. An expired
    /// record still hands over its refresh token.
    pub fn check_token_file(&mut self) -> Option<TokenRecord> {
        self.state = AuthState::CheckingCache;

        let Some(record) = self.store.load() else {
            self.state = self.resting_state();
            return None;
        };
        info!(path = ?self.store.path(), "Found token file");

        let expiry = check_expiry(&record.access_token);
        if expiry.is_valid {
            info!(minutes_remaining = expiry.seconds_remaining / 60, "Token valid");
            return Some(record);
        }

        match record.refresh_token {
            Some(refresh_token) => {
                info!("Access token expired, but refresh token available");
                self.refresh_token = Some(refresh_token);
            }
            None => warn!("Token expired and no refresh token available"),
        }
        self.state = self.resting_state();
        None
    }

    /// Exchange the held refresh token for a new access token.
    ///
    /// The new token is decoded before anything changes; on any failure the
    /// previous session is left as it was.
    pub async fn refresh(&mut self) -> Result<TokenRecord, AuthError> {
        let Some(refresh_token) = self.refresh_token.clone() else {
            warn!("No refresh token available");
            return Err(AuthError::NoRefreshToken);
        };

        let previous = self.state;
        self.state = AuthState::Refreshing;
        match self.try_refresh(refresh_token).await {
            Ok(record) => {
                info!("Token refreshed successfully");
                Ok(record)
            }
            Err(e) => {
                error!(error = %e, "Token refresh failed");
                self.state = previous;
                Err(e)
            }
        }
    }

    async fn try_refresh(&mut self, refresh_token: String) -> Result<TokenRecord, AuthError> {
        let metadata = self.provider_metadata().await?;

        let response = self
            .transport
            .refresh_token(&metadata.token_endpoint, &refresh_token, &self.settings.client_id)
            .await?;

        let mut record = match response {
            TokenResponse::Granted(record) => record,
            TokenResponse::Rejected(err) => {
                return Err(AuthError::RefreshRejected {
                    status: err.status,
                    error: err.error,
                    description: err.description,
                })
            }
        };

        let user_id = extract_identity(&record.access_token)?;

        // providers that do not rotate refresh tokens omit it
        if record.refresh_token.is_none() {
            record.refresh_token = Some(refresh_token);
        }

        self.adopt(record.access_token.clone(), record.refresh_token.clone(), user_id);
        self.store.save(&record);
        Ok(record)
    }

    /// Run the interactive device authorization flow.
    pub async fn device_flow(&mut self) -> Result<TokenRecord, AuthError> {
        match self.try_device_flow().await {
            Ok(record) => {
                info!("Authentication successful");
                Ok(record)
            }
            Err(e) => {
                error!(error = %e, "Device flow failed");
                self.state = self.resting_state();
                Err(e)
            }
        }
    }

    async fn try_device_flow(&mut self) -> Result<TokenRecord, AuthError> {
        let metadata = self.provider_metadata().await?;
        let device_endpoint = metadata.device_authorization_endpoint.as_deref().ok_or_else(|| {
            AuthError::InvalidResponse(
                "identity provider does not advertise a device_authorization_endpoint".into(),
            )
        })?;

        info!("Starting device authorization flow");
        let authorization = self
            .transport
            .request_device_code(device_endpoint, &self.settings.client_id, &self.options.scope)
            .await?;

        self.state = AuthState::DeviceFlowPending;
        present_verification(&authorization, self.options.open_browser);

        let record = DevicePoll {
            transport: self.transport.as_ref(),
            token_endpoint: &metadata.token_endpoint,
            device_code: &authorization.device_code,
            client_id: &self.settings.client_id,
            interval: Duration::from_secs(authorization.interval),
            max_wait: self.options.max_wait,
        }
        .run(&self.cancel)
        .await?;

        let user_id = extract_identity(&record.access_token)?;
        self.adopt(record.access_token.clone(), record.refresh_token.clone(), user_id);
        self.store.save(&record);
        Ok(record)
    }

    /// Discovery document, fetched on first use.
    async fn provider_metadata(&mut self) -> Result<ProviderMetadata, AuthError> {
        if let Some(metadata) = &self.metadata {
            return Ok(metadata.clone());
        }

        info!(issuer = %self.settings.issuer, "Fetching OIDC metadata");
        let metadata = self
            .transport
            .discover_metadata(&self.settings.issuer)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to fetch OIDC metadata"))?;
        self.metadata = Some(metadata.clone());
        Ok(metadata)
    }

    fn adopt(&mut self, access_token: String, refresh_token: Option<String>, user_id: String) {
        self.access_token = Some(access_token);
        self.refresh_token = refresh_token;
        self.user_id = Some(user_id);
        self.state = AuthState::Authenticated;
    }

    fn resting_state(&self) -> AuthState {
        match self.access_token.as_deref() {
            Some(token) if check_expiry(token).is_valid => AuthState::Authenticated,
            _ => AuthState::Unauthenticated,
        }
    }
}

fn present_verification(authorization: &DeviceAuthorization, open_browser: bool) {
    let url = authorization.verification_url();
    info!("AUTHENTICATION REQUIRED - complete login in your browser");
    info!("URL: {}", url);
    if let Some(code) = &authorization.user_code {
        info!("Code: {}", code);
    }

    if open_browser {
        match open::that_detached(url) {
            Ok(()) => info!("Browser opened automatically"),
            Err(e) => {
                debug!(error = %e, "Could not open browser");
                info!("Please open the URL manually");
            }
        }
    }
    info!("Waiting for authentication...");
}

/// [`AuthManager`] shared between the server and the API client.
///
/// Implements [`TokenRefresher`] so the GraphQL client can recover from a
/// rejected bearer token.
#[derive(Clone)]
pub struct SharedAuthManager {
    inner: Arc<Mutex<AuthManager>>,
}

impl SharedAuthManager {
    pub fn new(manager: AuthManager) -> Self {
        Self {
            inner: Arc::new(Mutex::new(manager)),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, AuthManager> {
        self.inner.lock().await
    }
}

#[async_trait]
impl TokenRefresher for SharedAuthManager {
    async fn refresh_access_token(&self) -> evergreen_core::Result<String> {
        let mut manager = self.inner.lock().await;
        let record = manager.refresh().await?;
        Ok(record.access_token)
    }
}
