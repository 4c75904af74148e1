//! MCP Client: JSON-RPC 2.0 over newline-delimited stdio
//!
//! Minimal Model Context Protocol client. Works over any async byte stream
//! pair (a child process's stdout/stdin in production, an in-memory duplex in
//! tests). Handles the initialize handshake, request/response correlation by
//! id, the tool-list cache, and `tools/list_changed` notifications.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::error::{ToolError, ToolResult};
use crate::jsonrpc::{
    decode_line, encode_line, Incoming, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    METHOD_NOT_FOUND,
};
use crate::protocol::{McpTool, ToolCallResult, ToolProtocolClient};

/// Protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Default timeout for MCP requests (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;
type PendingMap = DashMap<i64, oneshot::Sender<Result<Value, JsonRpcError>>>;

/// MCP client bound to one server connection.
pub struct McpClient {
    server_name: String,
    writer: Arc<Mutex<Writer>>,
    /// Next request ID (atomic for concurrent access).
    next_id: AtomicI64,
    /// Pending requests waiting for a response, keyed by request ID.
    pending: Arc<PendingMap>,
    tools: RwLock<Vec<McpTool>>,
    /// Set by the reader when the server announces a tool-list change.
    tools_stale: Arc<AtomicBool>,
    /// Set once the reader has stopped; no response can arrive after this.
    closed: Arc<AtomicBool>,
    initialized: AtomicBool,
    server_capabilities: RwLock<Value>,
    request_timeout: Duration,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl McpClient {
    /// Wrap a connected transport and start the background reader.
    ///
    /// The handshake is not performed; call [`McpClient::initialize`].
    pub fn new<R, W>(server_name: impl Into<String>, reader: R, writer: W, request_timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let server_name = server_name.into();
        let writer: Arc<Mutex<Writer>> = Arc::new(Mutex::new(Box::new(writer)));
        let pending: Arc<PendingMap> = Arc::new(DashMap::new());
        let tools_stale = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));

        let reader_handle = tokio::spawn(Self::reader_loop(
            server_name.clone(),
            reader,
            Arc::clone(&pending),
            Arc::clone(&writer),
            Arc::clone(&tools_stale),
            Arc::clone(&closed),
        ));

        Self {
            server_name,
            writer,
            next_id: AtomicI64::new(1),
            pending,
            tools: RwLock::new(Vec::new()),
            tools_stale,
            closed,
            initialized: AtomicBool::new(false),
            server_capabilities: RwLock::new(Value::Null),
            request_timeout,
            reader_handle,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Perform the initialize handshake and load the tool list.
    ///
    /// 1. Sends `initialize` with the client capabilities
    /// 2. Sends the `notifications/initialized` notification
    /// 3. Calls `tools/list` if the server advertises tools
    pub async fn initialize(&self) -> ToolResult<()> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "roots": {"listChanged": true},
                "sampling": {}
            },
            "clientInfo": {
                "name": "editflow",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let result = self.request("initialize", Some(params)).await?;
        let capabilities = result.get("capabilities").cloned().unwrap_or(Value::Null);
        *self.server_capabilities.write().await = capabilities;

        self.notify("notifications/initialized", None).await?;
        self.initialized.store(true, Ordering::Release);

        if self.has_tools_capability().await {
            self.refresh_tools().await?;
        }

        debug!(server = %self.server_name, "MCP server initialized");
        Ok(())
    }

    async fn has_tools_capability(&self) -> bool {
        self.server_capabilities
            .read()
            .await
            .get("tools")
            .is_some()
    }

    /// Re-fetch the tool list from the server.
    pub async fn refresh_tools(&self) -> ToolResult<Vec<McpTool>> {
        self.ensure_initialized()?;
        let result = self.request("tools/list", None).await?;
        let tools: Vec<McpTool> = match result.get("tools") {
            Some(list) => serde_json::from_value(list.clone())?,
            None => Vec::new(),
        };
        self.tools_stale.store(false, Ordering::Release);
        *self.tools.write().await = tools.clone();
        Ok(tools)
    }

    /// Cached tools, refreshed first if the server reported a change.
    pub async fn tools(&self) -> ToolResult<Vec<McpTool>> {
        self.ensure_initialized()?;
        if self.tools_stale.load(Ordering::Acquire) {
            return self.refresh_tools().await;
        }
        Ok(self.tools.read().await.clone())
    }

    /// Invoke `tools/call`.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult<ToolCallResult> {
        self.ensure_initialized()?;
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        let result = self.request("tools/call", Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Close the write half so the server sees EOF on stdin.
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(server = %self.server_name, error = %e, "MCP writer already closed");
        }
    }

    fn ensure_initialized(&self) -> ToolResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(ToolError::NotInitialized(self.server_name.clone()))
        }
    }

    /// Send a request and wait for the response (with timeout).
    pub async fn request(&self, method: &str, params: Option<Value>) -> ToolResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);

        // Register before sending so a fast response is never dropped
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        if self.closed.load(Ordering::SeqCst) {
            self.pending.remove(&id);
            return Err(self.closed_error(method, id));
        }

        if let Err(e) = self.send(&encode_line(&request)?).await {
            self.pending.remove(&id);
            return Err(e);
        }

        let outcome = match timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => return Err(self.closed_error(method, id)),
            Err(_) => {
                self.pending.remove(&id);
                return Err(ToolError::Timeout {
                    method: method.to_string(),
                    id,
                    secs: self.request_timeout.as_secs(),
                });
            }
        };

        outcome.map_err(|e| ToolError::Rpc {
            code: e.code,
            message: e.message,
        })
    }

    fn closed_error(&self, method: &str, id: i64) -> ToolError {
        ToolError::Transport(format!(
            "connection to '{}' closed while waiting for '{}' (id={})",
            self.server_name, method, id
        ))
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> ToolResult<()> {
        let notification = JsonRpcNotification::new(method, params);
        self.send(&encode_line(&notification)?).await
    }

    async fn send(&self, bytes: &[u8]) -> ToolResult<()> {
        write_line(&self.writer, bytes).await?;
        debug!(server = %self.server_name, "MCP -> {}", String::from_utf8_lossy(bytes).trim_end());
        Ok(())
    }

    /// Background reader loop: dispatches responses to pending requests,
    /// tracks tool-list changes, and answers server pings.
    async fn reader_loop<R>(
        server_name: String,
        reader: R,
        pending: Arc<PendingMap>,
        writer: Arc<Mutex<Writer>>,
        tools_stale: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
    ) where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut lines = BufReader::new(reader).lines();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(server = %server_name, error = %e, "Error reading from MCP server");
                    break;
                }
            };

            let message = match decode_line(&line) {
                None => continue,
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    warn!(server = %server_name, error = %e, "Invalid JSON from MCP server");
                    continue;
                }
            };

            debug!(server = %server_name, "MCP <- {}", line);

            match message.classify() {
                Some(Incoming::Response { id, outcome }) => {
                    if let Some((_, sender)) = pending.remove(&id) {
                        let _ = sender.send(outcome);
                    }
                }
                Some(Incoming::Notification { method, .. }) => {
                    if method == "notifications/tools/list_changed" {
                        tools_stale.store(true, Ordering::Release);
                    }
                }
                Some(Incoming::Request { id, method, .. }) => {
                    let reply = match method.as_str() {
                        "ping" => serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {}}),
                        "roots/list" => {
                            serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {"roots": []}})
                        }
                        _ => serde_json::json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "error": {"code": METHOD_NOT_FOUND, "message": format!("Method not found: {}", method)}
                        }),
                    };
                    if let Ok(bytes) = encode_line(&reply) {
                        if let Err(e) = write_line(&writer, &bytes).await {
                            warn!(server = %server_name, error = %e, "Failed to answer server request");
                        }
                    }
                }
                None => {}
            }
        }

        // Requests registered after this see the flag; earlier ones lose
        // their sender below and wake with a closed-channel error
        closed.store(true, Ordering::SeqCst);
        pending.clear();
        debug!(server = %server_name, "MCP reader stopped");
    }
}

async fn write_line(writer: &Mutex<Writer>, bytes: &[u8]) -> ToolResult<()> {
    let mut writer = writer.lock().await;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

#[async_trait]
impl ToolProtocolClient for McpClient {
    async fn list_tools(&self) -> ToolResult<Vec<McpTool>> {
        let mut tools = self.tools().await?;
        for tool in &mut tools {
            tool.server = Some(self.server_name.clone());
        }
        Ok(tools)
    }

    async fn call(&self, name: &str, arguments: Value) -> ToolResult<ToolCallResult> {
        self.call_tool(name, arguments).await
    }
}

// =============================================================================
// Tests
// =============================================================================
