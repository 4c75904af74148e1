//! MCP Tool Bridge
//!
//! Adapts a `ToolProtocolClient` to what the model needs: tool definitions
//! for the request, a tools paragraph for the system prompt, and tool results
//! rendered as plain text.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

use editflow_llm::{ToolCall, ToolDefinition};

use crate::error::ToolResult;
use crate::protocol::{ContentPart, McpTool, ToolCallResult, ToolProtocolClient};

/// Caches the tool list of a protocol client.
pub struct McpToolBridge {
    client: Arc<dyn ToolProtocolClient>,
    cache: RwLock<Option<Vec<McpTool>>>,
}

impl McpToolBridge {
    pub fn new(client: Arc<dyn ToolProtocolClient>) -> Self {
        Self {
            client,
            cache: RwLock::new(None),
        }
    }

    /// Tools from the cache, loading it on first use.
    pub async fn tools(&self) -> ToolResult<Vec<McpTool>> {
        if let Some(tools) = self.cache.read().await.as_ref() {
            return Ok(tools.clone());
        }
        let tools = self.client.list_tools().await?;
        *self.cache.write().await = Some(tools.clone());
        Ok(tools)
    }

    /// Force the next lookup to hit the client.
    pub async fn invalidate_cache(&self) {
        *self.cache.write().await = None;
    }

    pub async fn has_tools(&self) -> bool {
        match self.tools().await {
            Ok(tools) => !tools.is_empty(),
            Err(e) => {
                warn!(error = %e, "Failed to list MCP tools");
                false
            }
        }
    }

    pub async fn tool_definitions(&self) -> ToolResult<Vec<ToolDefinition>> {
        Ok(self.tools().await?.iter().map(to_tool_definition).collect())
    }

    /// Paragraph appended to the system prompt, or `None` without tools.
    pub async fn tools_prompt(&self) -> ToolResult<Option<String>> {
        let tools = self.tools().await?;
        Ok(tools_description(&tools))
    }

    /// Execute one model tool call and render the outcome as text.
    ///
    /// Failures, timeouts included, become the text of the result so the
    /// model can see what went wrong.
    pub async fn execute(&self, call: &ToolCall) -> String {
        let arguments = match &call.arguments {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        match self.client.call(&call.name, arguments).await {
            Ok(result) => format_tool_result(&result),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "MCP tool call failed");
                format!("Error calling MCP tool '{}': {}", call.name, e)
            }
        }
    }
}

/// Convert an MCP tool into a model-facing definition.
pub fn to_tool_definition(tool: &McpTool) -> ToolDefinition {
    ToolDefinition {
        name: tool.name.clone(),
        description: tool.description.clone().unwrap_or_default(),
        input_schema: tool.input_schema.clone(),
    }
}

/// System-prompt description of the available tools.
pub fn tools_description(tools: &[McpTool]) -> Option<String> {
    if tools.is_empty() {
        return None;
    }
    let mut text = String::from("You have access to the following tools from MCP servers:\n\n");
    for tool in tools {
        text.push_str(&format!(
            "- {}: {}\n",
            tool.name,
            tool.description.as_deref().unwrap_or("")
        ));
    }
    text.push_str("\nYou can call these tools by using function calls in your response.");
    Some(text)
}

/// Render a tool result for the model.
pub fn format_tool_result(result: &ToolCallResult) -> String {
    if result.is_error {
        let message = result
            .content
            .iter()
            .find_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .unwrap_or("Unknown error");
        return format!("Tool execution error: {}", message);
    }

    if result.content.is_empty() {
        return "Tool executed successfully (no output)".to_string();
    }

    let mut parts: Vec<String> = Vec::new();
    for part in &result.content {
        match part {
            ContentPart::Text { text } => parts.push(text.clone()),
            ContentPart::Image { mime_type } => parts.push(format!(
                "[Image: {}]",
                mime_type.as_deref().unwrap_or("unknown")
            )),
            ContentPart::Audio { mime_type } => parts.push(format!(
                "[Audio: {}]",
                mime_type.as_deref().unwrap_or("unknown")
            )),
            ContentPart::Resource { resource } => {
                let uri = resource
                    .as_ref()
                    .and_then(|r| r.uri.as_deref())
                    .unwrap_or("unknown");
                parts.push(format!("[Resource: {}]", uri));
                if let Some(text) = resource.as_ref().and_then(|r| r.text.as_ref()) {
                    if !text.is_empty() {
                        parts.push(text.clone());
                    }
                }
            }
            ContentPart::Unknown => {}
        }
    }

    if parts.is_empty() {
        "Tool executed successfully".to_string()
    } else {
        parts.join("\n")
    }
}
