//! Gemini LLM module
//!
//! Wire types, the REST client and conversion of MCP tool schemas into
//! function declarations.

pub mod client;
pub mod schema;
pub mod types;

pub use client::GeminiClient;
