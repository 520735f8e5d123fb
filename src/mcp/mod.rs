//! MCP (Model Context Protocol) module
//!
//! Implements the client side of the MCP protocol over a stdio transport.

pub mod client;
pub mod transport;
pub mod types;

pub use client::McpClient;
