//! Stdio transport for MCP
//!
//! Launches the server as a child process and exchanges newline-delimited
//! JSON-RPC messages over its stdin/stdout. The reader and writer halves are
//! boxed so the same transport can run over in-memory pipes.

use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

use crate::config::ServerParams;
use crate::error::McpError;
use crate::mcp::types::*;

/// Default time to wait for a response
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Time the server gets to exit after its stdin is closed
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Line-delimited JSON-RPC transport
pub struct StdioTransport {
    reader: BufReader<BoxedReader>,

    /// `None` once closed
    writer: Option<BoxedWriter>,

    /// Server process, when we launched one
    child: Option<Child>,

    next_id: i64,
    request_timeout: Duration,
    shutdown_grace: Duration,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("open", &self.writer.is_some())
            .field("pid", &self.child.as_ref().and_then(Child::id))
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl StdioTransport {
    /// Create a transport over an existing reader/writer pair
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: BufReader::new(Box::new(reader) as BoxedReader),
            writer: Some(Box::new(writer)),
            child: None,
            next_id: 1,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Launch the server process and connect to its stdio
    pub fn spawn(params: &ServerParams) -> Result<Self, McpError> {
        tracing::debug!(
            "Launching MCP server '{}': {} {}",
            params.name,
            params.command,
            params.args.join(" ")
        );

        let mut child = Command::new(&params.command)
            .args(&params.args)
            .envs(&params.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| McpError::Spawn {
                command: params.command.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or_else(|| McpError::Protocol {
            message: "Failed to capture server stdin".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::Protocol {
            message: "Failed to capture server stdout".to_string(),
        })?;

        let mut transport = Self::new(stdout, stdin);
        transport.child = Some(child);
        Ok(transport)
    }

    /// Override the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override how long `close` waits before killing the server
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// OS process id of the launched server
    pub fn server_pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Whether the transport can still send messages
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Send a request and wait for its response
    ///
    /// Returns the `result` member; a JSON-RPC error becomes [`McpError::Rpc`].
    pub async fn send_request(&mut self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = RequestId::Number(self.next_id);
        self.next_id += 1;

        tracing::debug!(method = %method, id = %id, "Sending request");
        self.write_message(&JsonRpcRequest::new(id.clone(), method, params))
            .await?;

        let timeout = self.request_timeout;
        let response = tokio::time::timeout(timeout, self.read_response(&id))
            .await
            .map_err(|_| McpError::Timeout {
                method: method.to_string(),
                secs: timeout.as_secs(),
            })??;

        if let Some(err) = response.error {
            return Err(McpError::Rpc {
                method: method.to_string(),
                code: err.code,
                message: err.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Send a notification (no response expected)
    pub async fn send_notification(&mut self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        tracing::debug!(method = %method, "Sending notification");
        self.write_message(&JsonRpcNotification::new(method, params))
            .await
    }

    /// Close stdin and wait for the server to exit, killing it if it lingers
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }

        let Some(mut child) = self.child.take() else {
            return;
        };
        match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!("MCP server exited with {}", status),
            Ok(Err(e)) => tracing::warn!("Failed to wait for MCP server: {}", e),
            Err(_) => {
                tracing::warn!("MCP server did not exit, killing it");
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill MCP server: {}", e);
                }
            }
        }
    }

    async fn write_message<T: Serialize>(&mut self, message: &T) -> Result<(), McpError> {
        let mut line = serde_json::to_string(message).map_err(|e| McpError::Protocol {
            message: e.to_string(),
        })?;
        line.push('\n');

        let writer = self.writer.as_mut().ok_or(McpError::ConnectionClosed)?;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn read_response(&mut self, id: &RequestId) -> Result<JsonRpcResponse, McpError> {
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(McpError::ConnectionClosed);
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match IncomingMessage::parse(line) {
                Ok(IncomingMessage::Response(response)) if &response.id == id => return Ok(response),
                Ok(IncomingMessage::Response(response)) => {
                    tracing::debug!(id = %response.id, "Skipping response for another request");
                }
                Ok(IncomingMessage::Notification(notification)) => {
                    tracing::debug!(method = %notification.method, "Server notification");
                }
                Ok(IncomingMessage::Request(request)) => {
                    self.answer_server_request(request).await?;
                }
                Err(e) => {
                    tracing::warn!("Ignoring unparseable server output ({}): {}", e, line);
                }
            }
        }
    }

    async fn answer_server_request(&mut self, request: JsonRpcRequest) -> Result<(), McpError> {
        tracing::debug!(method = %request.method, id = %request.id, "Server request");
        let response = match request.method.as_str() {
            methods::PING => JsonRpcResponse::success(request.id, json!({})),
            _ => JsonRpcResponse::error(request.id, JsonRpcError::method_not_found(&request.method)),
        };
        self.write_message(&response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn test_skips_noise_and_answers_ping() {
        let (client_side, server_side) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_side);
        let (server_read, mut server_write) = tokio::io::split(server_side);

        let server = tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let request: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            assert_eq!(request["method"], "tools/list");

            let noise = concat!(
                "\n",
                "server booting...\n",
                "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",\"params\":{}}\n",
                "{\"jsonrpc\":\"2.0\",\"id\":\"srv-1\",\"method\":\"ping\"}\n",
            );
            server_write.write_all(noise.as_bytes()).await.unwrap();

            let pong: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            assert_eq!(pong["id"], "srv-1");
            assert!(pong["result"].is_object());

            let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": {"tools": []}});
            server_write
                .write_all(format!("{}\n", reply).as_bytes())
                .await
                .unwrap();
        });

        let mut transport = StdioTransport::new(client_read, client_write);
        let result = transport.send_request("tools/list", None).await.unwrap();
        assert_eq!(result, json!({"tools": []}));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_unsupported_server_requests() {
        let (client_side, server_side) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_side);
        let (server_read, mut server_write) = tokio::io::split(server_side);

        let server = tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let request: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();

            let sampling = "{\"jsonrpc\":\"2.0\",\"id\":\"s2\",\"method\":\"sampling/createMessage\"}\n";
            server_write.write_all(sampling.as_bytes()).await.unwrap();

            let rejection: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            assert_eq!(rejection["id"], "s2");
            assert_eq!(rejection["error"]["code"], -32601);
            assert!(rejection.get("result").is_none());

            let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": {"tools": []}});
            server_write
                .write_all(format!("{}\n", reply).as_bytes())
                .await
                .unwrap();
        });

        let mut transport = StdioTransport::new(client_read, client_write);
        let result = transport.send_request("tools/list", None).await.unwrap();
        assert_eq!(result, json!({"tools": []}));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_rpc_error_and_closed_connection() {
        let (client_side, server_side) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_side);
        let (server_read, mut server_write) = tokio::io::split(server_side);

        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let request: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            let reply = json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "error": {"code": -32601, "message": "Method not found: bogus"}
            });
            server_write
                .write_all(format!("{}\n", reply).as_bytes())
                .await
                .unwrap();
            // Dropping both halves closes the pipe
        });

        let mut transport = StdioTransport::new(client_read, client_write);
        let err = transport.send_request("bogus", None).await.unwrap_err();
        assert!(matches!(err, McpError::Rpc { code: -32601, .. }));

        let err = transport.send_request("tools/list", None).await.unwrap_err();
        assert!(matches!(err, McpError::ConnectionClosed | McpError::Transport(_)));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let (client_side, _server_side) = duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_side);

        let mut transport =
            StdioTransport::new(client_read, client_write).with_timeout(Duration::from_millis(50));
        let err = transport.send_request("tools/list", None).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (client_side, _server_side) = duplex(64);
        let (client_read, client_write) = tokio::io::split(client_side);

        let mut transport = StdioTransport::new(client_read, client_write);
        transport.close().await;
        assert!(!transport.is_open());

        let err = transport.send_notification("notifications/initialized", None).await;
        tokio_test::assert_err!(err);
    }

    #[cfg(unix)]
    fn server(command: &str, args: &[&str], env: &[(&str, &str)]) -> ServerParams {
        ServerParams {
            name: "test-server".to_string(),
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawned_server_sees_merged_env() {
        std::env::set_var("MCP_GEMINI_CLIENT_INHERITED", "from-parent");
        let script = r#"read -r line; printf '{"jsonrpc":"2.0","id":1,"result":{"token":"%s","inherited":"%s"}}\n' "$SERVER_TOKEN" "$MCP_GEMINI_CLIENT_INHERITED"; cat > /dev/null"#;
        let params = server("sh", &["-c", script], &[("SERVER_TOKEN", "secret-42")]);

        let mut transport = StdioTransport::spawn(&params).unwrap();
        assert!(transport.server_pid().is_some());

        let result = transport.send_request("initialize", None).await.unwrap();
        assert_eq!(result, json!({"token": "secret-42", "inherited": "from-parent"}));

        // The server exits on EOF, well within the grace period
        let started = std::time::Instant::now();
        transport.close().await;
        assert!(started.elapsed() < DEFAULT_SHUTDOWN_GRACE);
        assert!(!transport.is_open());
        assert!(transport.server_pid().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_kills_lingering_server() {
        let params = server("sleep", &["30"], &[]);
        let mut transport = StdioTransport::spawn(&params)
            .unwrap()
            .with_shutdown_grace(Duration::from_millis(100));

        let started = std::time::Instant::now();
        transport.close().await;
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(transport.server_pid().is_none());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_dropping_transport_kills_server() {
        let params = server("sleep", &["30"], &[]);
        let transport = StdioTransport::spawn(&params).unwrap();
        let pid = transport.server_pid().unwrap();
        drop(transport);

        // Killed processes linger as zombies until reaped
        let stat = format!("/proc/{}/stat", pid);
        let mut gone = false;
        for _ in 0..50 {
            gone = match std::fs::read_to_string(&stat) {
                Ok(content) => content.contains(") Z "),
                Err(_) => true,
            };
            if gone {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(gone, "server process {} still running", pid);
    }
}
