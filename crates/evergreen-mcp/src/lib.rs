//! MCP (Model Context Protocol) server for Evergreen.
//!
//! This crate implements the MCP server that exposes Evergreen patches,
//! tasks, logs and test results to AI assistants.

pub mod context;
mod format;
pub mod handlers;
pub mod protocol;
pub mod server;
#[cfg(test)]
mod testing;
pub mod transport;

pub use context::EvergreenContext;
pub use server::McpServer;
