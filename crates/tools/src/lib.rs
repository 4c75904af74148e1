//! editflow Tools
//!
//! External tool support over the Model Context Protocol:
//! - `ToolProtocolClient` - the capability the orchestrator consumes
//! - `McpClient` - newline-delimited JSON-RPC 2.0 client with request correlation
//! - `McpServerManager` - child-process lifecycle and tool routing across servers
//! - `McpToolBridge` - tool cache, model-facing definitions, result formatting

pub mod bridge;
pub mod client;
pub mod error;
pub mod jsonrpc;
pub mod manager;
pub mod protocol;

pub use bridge::{format_tool_result, to_tool_definition, tools_description, McpToolBridge};
pub use client::{McpClient, DEFAULT_REQUEST_TIMEOUT_SECS, PROTOCOL_VERSION};
pub use error::{ToolError, ToolResult};
pub use manager::{McpServerConfig, McpServerManager};
pub use protocol::{ContentPart, McpTool, ResourceContents, ToolCallResult, ToolProtocolClient};
