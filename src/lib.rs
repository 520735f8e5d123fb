//! MCP Gemini Client Library
//!
//! A Model Context Protocol (MCP) client that exposes the tools of one
//! stdio MCP server to a Gemini model and runs the resulting tool calls.

pub mod config;
pub mod engine;
pub mod error;
pub mod llm;
pub mod logging;
pub mod mcp;
pub mod repl;

pub use config::Config;
pub use engine::{Engine, SessionSettings};
pub use error::{ClientError, Result};
