//! Core traits, configuration, and error handling for evergreen-mcp.
//!
//! This crate provides the foundational abstractions shared by the
//! authentication manager, the GraphQL client and the MCP server.

pub mod api;
pub mod config;
pub mod error;
pub mod workspace;

pub use api::{EvergreenApi, TokenRefresher, DEFAULT_FAILED_STATUSES};
pub use config::{Config, OAuthSettings};
pub use error::{Error, Result};
