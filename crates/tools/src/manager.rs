//! MCP Server Manager
//!
//! Spawns MCP servers as child processes, keeps one `McpClient` per server,
//! and routes tool calls to the server that owns each tool.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::{Child, Command};
use tokio::sync::RwLock;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

use crate::client::{McpClient, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::error::{ToolError, ToolResult};
use crate::protocol::{McpTool, ToolCallResult, ToolProtocolClient};

/// Grace period between closing a server's stdin and killing it.
const STOP_GRACE_SECS: u64 = 5;

/// Launch configuration for one MCP server (`mcpServers.<name>`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

struct RunningServer {
    client: Arc<McpClient>,
    child: Child,
}

/// Owns every running MCP server.
pub struct McpServerManager {
    servers: RwLock<HashMap<String, RunningServer>>,
    request_timeout: Duration,
}

impl Default for McpServerManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }
}

impl McpServerManager {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            request_timeout,
        }
    }

    /// Read the `mcpServers` map from a JSON config file.
    ///
    /// Any failure is logged and yields an empty map.
    pub fn load_config_from_file(path: &Path) -> HashMap<String, McpServerConfig> {
        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<Value>(&text).map_err(|e| e.to_string()))
            .and_then(|value| match value.get("mcpServers") {
                Some(servers) => serde_json::from_value(servers.clone()).map_err(|e| e.to_string()),
                None => Ok(HashMap::new()),
            });

        match parsed {
            Ok(servers) => servers,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Error loading MCP server config");
                HashMap::new()
            }
        }
    }

    /// Start a server and complete its handshake. Already-running servers
    /// are left alone.
    pub async fn start_server(&self, name: &str, config: &McpServerConfig) -> ToolResult<()> {
        if self.servers.read().await.contains_key(name) {
            return Ok(());
        }

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ToolError::Transport(format!(
                    "Failed to spawn MCP server '{}' ({}): {}",
                    name, config.command, e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::Transport(format!("No stdin for MCP server '{}'", name)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::Transport(format!("No stdout for MCP server '{}'", name)))?;

        let client = McpClient::new(name, stdout, stdin, self.request_timeout);
        if let Err(e) = client.initialize().await {
            warn!(server = name, error = %e, "Failed to initialize MCP server");
            let _ = child.kill().await;
            return Err(e);
        }

        let mut servers = self.servers.write().await;
        // Lost a race with a concurrent start; keep the first one
        if servers.contains_key(name) {
            let _ = child.kill().await;
            return Ok(());
        }
        servers.insert(
            name.to_string(),
            RunningServer {
                client: Arc::new(client),
                child,
            },
        );
        info!(server = name, "MCP server started");
        Ok(())
    }

    /// Start every configured server, returning the names that failed.
    pub async fn start_all(&self, configs: &HashMap<String, McpServerConfig>) -> Vec<String> {
        let mut names: Vec<&String> = configs.keys().collect();
        names.sort();
        let mut failed = Vec::new();
        for name in names {
            if let Err(e) = self.start_server(name, &configs[name]).await {
                warn!(server = %name, error = %e, "Failed to start MCP server");
                failed.push(name.clone());
            }
        }
        failed
    }

    /// Close stdin, wait up to the grace period, then kill.
    pub async fn stop_server(&self, name: &str) -> ToolResult<()> {
        let removed = self.servers.write().await.remove(name);
        let Some(mut server) = removed else {
            return Err(ToolError::ServerNotFound(name.to_string()));
        };

        server.client.close().await;
        match timeout(Duration::from_secs(STOP_GRACE_SECS), server.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!(server = name, "MCP server did not exit in time, killing");
                server.child.kill().await?;
            }
        }
        info!(server = name, "MCP server stopped");
        Ok(())
    }

    pub async fn stop_all_servers(&self) {
        let names: Vec<String> = self.servers.read().await.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.stop_server(&name).await {
                warn!(server = %name, error = %e, "Error stopping MCP server");
            }
        }
    }

    pub async fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tools from every server, tagged with the server name.
    ///
    /// A server that fails to list is logged and skipped.
    pub async fn get_all_tools(&self) -> Vec<McpTool> {
        let clients = self.clients().await;
        let mut all = Vec::new();
        for (name, client) in clients {
            match client.tools().await {
                Ok(tools) => all.extend(tools.into_iter().map(|mut tool| {
                    tool.server = Some(name.clone());
                    tool
                })),
                Err(e) => warn!(server = %name, error = %e, "Error getting tools from MCP server"),
            }
        }
        all
    }

    /// Route a tool call to `server`, or to the first server exposing `tool_name`.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
        server: Option<&str>,
    ) -> ToolResult<ToolCallResult> {
        if let Some(server) = server {
            let client = self
                .servers
                .read()
                .await
                .get(server)
                .map(|s| Arc::clone(&s.client))
                .ok_or_else(|| ToolError::ServerNotFound(server.to_string()))?;
            return client.call_tool(tool_name, arguments).await;
        }

        for (_, client) in self.clients().await {
            let exposes = client
                .tools()
                .await
                .map(|tools| tools.iter().any(|t| t.name == tool_name))
                .unwrap_or(false);
            if exposes {
                return client.call_tool(tool_name, arguments).await;
            }
        }
        Err(ToolError::ToolNotFound(tool_name.to_string()))
    }

    /// Snapshot of running clients, sorted by server name so routing is stable.
    async fn clients(&self) -> Vec<(String, Arc<McpClient>)> {
        let servers = self.servers.read().await;
        let mut clients: Vec<(String, Arc<McpClient>)> = servers
            .iter()
            .map(|(name, s)| (name.clone(), Arc::clone(&s.client)))
            .collect();
        clients.sort_by(|a, b| a.0.cmp(&b.0));
        clients
    }
}

#[async_trait]
impl ToolProtocolClient for McpServerManager {
    async fn list_tools(&self) -> ToolResult<Vec<McpTool>> {
        Ok(self.get_all_tools().await)
    }

    async fn call(&self, name: &str, arguments: Value) -> ToolResult<ToolCallResult> {
        self.call_tool(name, arguments, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(body: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_config_reads_mcp_servers() {
        let file = write_config(
            r#"{"mcpServers": {"docs": {"command": "npx", "args": ["-y", "docs-server"], "env": {"TOKEN": "x"}}}}"#,
        );
        let servers = McpServerManager::load_config_from_file(file.path());
        let docs = &servers["docs"];
        assert_eq!(docs.command, "npx");
        assert_eq!(docs.args, vec!["-y", "docs-server"]);
        assert_eq!(docs.env["TOKEN"], "x");
    }

    #[test]
    fn test_load_config_errors_yield_empty() {
        let file = write_config("{not json");
        assert!(McpServerManager::load_config_from_file(file.path()).is_empty());

        let missing = std::path::Path::new("/definitely/not/here.json");
        assert!(McpServerManager::load_config_from_file(missing).is_empty());

        let file = write_config(r#"{"other": 1}"#);
        assert!(McpServerManager::load_config_from_file(file.path()).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_server_and_tool() {
        let manager = McpServerManager::default();
        let err = manager
            .call_tool("lookup", Value::Null, Some("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ServerNotFound(_)));

        let err = manager.call_tool("lookup", Value::Null, None).await.unwrap_err();
        assert!(matches!(err, ToolError::ToolNotFound(_)));

        assert!(matches!(
            manager.stop_server("nope").await,
            Err(ToolError::ServerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_transport_error() {
        let manager = McpServerManager::default();
        let config = McpServerConfig {
            command: "/nonexistent/mcp-server-binary".to_string(),
            ..Default::default()
        };
        let err = manager.start_server("broken", &config).await.unwrap_err();
        assert!(matches!(err, ToolError::Transport(_)));
        assert!(manager.server_names().await.is_empty());
    }
}
