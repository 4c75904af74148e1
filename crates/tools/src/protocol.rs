//! Tool Protocol Types
//!
//! MCP tool descriptors, call results, and the `ToolProtocolClient` trait the
//! orchestrator consumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolResult;

/// A tool published by an MCP server (`tools/list` entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
    /// Name of the server that published the tool. Filled in by the manager.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}, "required": []})
}

/// Embedded resource inside a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// One part of a tool result's `content` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text {
        #[serde(default)]
        text: String,
    },
    Image {
        #[serde(default, rename = "mimeType")]
        mime_type: Option<String>,
    },
    Audio {
        #[serde(default, rename = "mimeType")]
        mime_type: Option<String>,
    },
    Resource {
        #[serde(default)]
        resource: Option<ResourceContents>,
    },
    #[serde(other)]
    Unknown,
}

/// Result of `tools/call`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ContentPart>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::Text { text: text.into() }],
            is_error: false,
        }
    }
}

/// External tool capability consumed by the reflection coordinator.
#[async_trait]
pub trait ToolProtocolClient: Send + Sync {
    /// All tools currently exposed.
    async fn list_tools(&self) -> ToolResult<Vec<McpTool>>;

    /// Invoke a tool by name.
    async fn call(&self, name: &str, arguments: Value) -> ToolResult<ToolCallResult>;
}
