//! OIDC authentication for evergreen-mcp.
//!
//! Provides the device authorization flow, refresh-token exchange, and an
//! atomically written token file so a session survives restarts.
//!
//! # Example
//!
//! ```ignore
//! use evergreen_auth::AuthManager;
//! use evergreen_core::Config;
//!
//! let settings = Config::load()?.oauth_settings()?;
//! let mut auth = AuthManager::new(settings);
//! auth.ensure_authenticated().await?;
//! println!("logged in as {}", auth.user_id().unwrap_or("?"));
//! ```

pub mod claims;
pub mod device_flow;
pub mod error;
pub mod manager;
pub mod store;
pub mod token;
pub mod transport;

pub use claims::{check_expiry, extract_identity, Expiry};
pub use error::AuthError;
pub use manager::{AuthManager, AuthState, DeviceFlowOptions, SharedAuthManager};
pub use store::TokenStore;
pub use token::TokenRecord;
pub use transport::{HttpOAuthTransport, OAuthTransport};
