//! Error types for the MCP Gemini client
//!
//! This module defines the error hierarchy for all operations in the client.

use thiserror::Error;

/// Main error type for the MCP Gemini client
#[derive(Error, Debug)]
pub enum ClientError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// MCP session errors
    #[error("MCP error: {0}")]
    Mcp(#[from] McpError),

    /// Gemini API errors
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid JSON in {path}: {message}")]
    InvalidJson { path: String, message: String },

    #[error("Missing '{key}' key in {path}")]
    MissingKey { key: String, path: String },

    #[error("Unsupported transportType for '{server}': {transport}")]
    UnsupportedTransport { server: String, transport: String },

    #[error("Workflow '{workflow}' uses undefined MCP server: '{server}'")]
    UndefinedServer { workflow: String, server: String },

    #[error("MCP server '{name}' not defined")]
    UnknownServer { name: String },

    #[error("Workflow '{name}' not defined")]
    UnknownWorkflow { name: String },

    #[error("Server script must be a .py or .js file: {path}")]
    InvalidScript { path: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl ConfigError {
    /// Whether this error means a configuration file could not be located
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConfigError::FileNotFound { .. })
    }
}

/// MCP session and transport errors
#[derive(Error, Debug)]
pub enum McpError {
    #[error("Failed to start MCP server '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Not connected to MCP server {server}")]
    NotConnected { server: String },

    #[error("MCP server closed the connection")]
    ConnectionClosed,

    #[error("Timed out after {secs}s waiting for response to '{method}'")]
    Timeout { method: String, secs: u64 },

    #[error("Server returned error {code} for '{method}': {message}")]
    Rpc {
        method: String,
        code: i32,
        message: String,
    },

    #[error("Tool '{name}' failed: {message}")]
    ToolCall { name: String, message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// Gemini API errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Gemini API request failed ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse Gemini response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether the request is worth repeating
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            LlmError::Http(e) => e.is_timeout() || e.is_connect(),
            LlmError::Decode(_) => false,
        }
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
