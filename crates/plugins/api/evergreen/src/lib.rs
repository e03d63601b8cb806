//! Evergreen GraphQL client for evergreen-mcp.
//!
//! Authenticates with either an OIDC bearer token or an Evergreen user/API
//! key pair, and recovers from a rejected bearer token by asking a
//! [`TokenRefresher`](evergreen_core::TokenRefresher) for a new one.

mod client;
pub mod queries;

pub use client::{Credentials, EvergreenGraphQlClient};

/// `User-Agent` sent with every request.
pub const USER_AGENT: &str = concat!("evergreen-mcp-server/", env!("CARGO_PKG_VERSION"));
