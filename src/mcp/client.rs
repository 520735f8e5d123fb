//! MCP client session
//!
//! Wraps one stdio transport: performs the initialization handshake, caches
//! the server's tool list and forwards tool calls. A session is either
//! connected or closed; every operation on a closed session fails with
//! [`McpError::NotConnected`].

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::ServerParams;
use crate::error::McpError;
use crate::mcp::transport::StdioTransport;
use crate::mcp::types::*;

/// Client name reported to servers
const CLIENT_NAME: &str = "mcp-gemini-client";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Guard against servers that keep returning a cursor
const MAX_TOOL_PAGES: usize = 100;

/// A session with a single MCP server
#[derive(Debug)]
pub struct McpClient {
    server_name: String,

    /// `None` once the session is closed
    transport: Option<StdioTransport>,

    server_info: Option<Implementation>,
    instructions: Option<String>,
    tools: Vec<Tool>,
}

impl McpClient {
    /// Launch the server described by `params` and connect to it
    pub async fn connect(params: &ServerParams) -> Result<Self, McpError> {
        tracing::info!("Connecting to MCP server: {}", params.name);
        let transport = StdioTransport::spawn(params)?;

        Self::with_transport(params.name.clone(), transport)
            .await
            .inspect_err(|e| {
                tracing::error!("Failed to connect to MCP server {}: {}", params.name, e);
            })
    }

    /// Run the handshake over an already established transport
    pub async fn with_transport(server_name: String, transport: StdioTransport) -> Result<Self, McpError> {
        let mut client = Self {
            server_name,
            transport: Some(transport),
            server_info: None,
            instructions: None,
            tools: Vec::new(),
        };

        client.initialize().await?;
        client.list_tools().await?;

        tracing::info!(
            "Connected to {} with tools: {:?}",
            client.server_name,
            client.tool_names()
        );
        Ok(client)
    }

    async fn initialize(&mut self) -> Result<(), McpError> {
        let params = InitializeParams {
            protocol_version: MCP_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: CLIENT_NAME.to_string(),
                version: CLIENT_VERSION.to_string(),
            },
        };
        let params = serde_json::to_value(params).map_err(|e| McpError::Protocol {
            message: e.to_string(),
        })?;

        let value = self
            .transport_mut()?
            .send_request(methods::INITIALIZE, Some(params))
            .await?;
        let result: InitializeResult = decode(methods::INITIALIZE, value)?;

        if result.protocol_version != MCP_VERSION {
            tracing::warn!(
                "Server {} negotiated protocol version {} (requested {})",
                self.server_name,
                result.protocol_version,
                MCP_VERSION
            );
        }
        if result.capabilities.tools.is_none() {
            tracing::warn!(
                "Server {} does not advertise the tools capability",
                self.server_name
            );
        }
        tracing::debug!(
            "Server info: {} {}",
            result.server_info.name,
            result.server_info.version
        );

        self.server_info = Some(result.server_info);
        self.instructions = result.instructions;

        self.transport_mut()?
            .send_notification(methods::INITIALIZED, None)
            .await
    }

    /// Fetch the server's tools, following pagination, and cache them
    pub async fn list_tools(&mut self) -> Result<&[Tool], McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor
                .take()
                .map(|cursor| serde_json::to_value(ListToolsParams { cursor: Some(cursor) }))
                .transpose()
                .map_err(|e| McpError::Protocol {
                    message: e.to_string(),
                })?;
            let value = self
                .transport_mut()?
                .send_request(methods::LIST_TOOLS, params)
                .await?;
            let page: ListToolsResult = decode(methods::LIST_TOOLS, value)?;

            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        if cursor.is_some() {
            tracing::warn!(
                "Server {} returned more than {} pages of tools, truncating",
                self.server_name,
                MAX_TOOL_PAGES
            );
        }

        tracing::debug!(
            "Listed tools for {}: {:?}",
            self.server_name,
            tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>()
        );
        self.tools = tools;
        Ok(&self.tools)
    }

    /// Call a tool on the server
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        tracing::info!("Calling tool '{}' on server '{}'", name, self.server_name);
        tracing::debug!("Full args for '{}': {}", name, arguments);

        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })
        .map_err(|e| McpError::Protocol {
            message: e.to_string(),
        })?;

        let value = self
            .transport_mut()?
            .send_request(methods::CALL_TOOL, Some(params))
            .await
            .map_err(|e| match e {
                McpError::Rpc { message, .. } => McpError::ToolCall {
                    name: name.to_string(),
                    message,
                },
                other => other,
            })?;

        let result: CallToolResult = decode(methods::CALL_TOOL, value)?;
        tracing::debug!(
            "Raw tool result content for '{}': {}",
            name,
            crate::engine::snippet(&result.joined_text(), 200)
        );
        Ok(result)
    }

    /// Close the session and stop the server
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            tracing::info!("Closing MCP session with {}", self.server_name);
            transport.close().await;
        }
    }

    /// Whether the session is still open
    pub fn is_connected(&self) -> bool {
        self.transport.as_ref().is_some_and(StdioTransport::is_open)
    }

    /// Tools cached from the last listing
    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    /// Names of the cached tools
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    /// Whether the server advertised a tool with this name
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    /// Name of the server this session talks to
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Server implementation info from the handshake
    pub fn server_info(&self) -> Option<&Implementation> {
        self.server_info.as_ref()
    }

    /// Usage instructions sent by the server, if any
    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    fn transport_mut(&mut self) -> Result<&mut StdioTransport, McpError> {
        match self.transport.as_mut() {
            Some(transport) if transport.is_open() => Ok(transport),
            _ => {
                tracing::error!("Attempted to use unconnected MCP server {}", self.server_name);
                Err(McpError::NotConnected {
                    server: self.server_name.clone(),
                })
            }
        }
    }
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, McpError> {
    serde_json::from_value(value).map_err(|e| McpError::Protocol {
        message: format!("Malformed '{}' result: {}", method, e),
    })
}
