//! LLM Types
//!
//! Core types for model backend interactions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supported backend flavours. Both speak the chat-completions wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    #[serde(rename = "openai")]
    OpenAI,
    /// Any server exposing an OpenAI-compatible `/chat/completions` endpoint
    /// (vLLM, Ollama's OpenAI shim, DeepSeek, ...).
    #[serde(rename = "openai_compatible")]
    OpenAICompatible,
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderType::OpenAI => write!(f, "openai"),
            ProviderType::OpenAICompatible => write!(f, "openai_compatible"),
        }
    }
}

/// Per-request options for provider behavior.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmRequestOptions {
    /// Optional temperature override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_override: Option<f32>,
    /// Optional cap on generated tokens for this request only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens_override: Option<u32>,
}

/// Configuration for a model backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: ProviderType,
    /// API key (optional for local OpenAI-compatible servers)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Full chat-completions URL override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Model name to use
    pub model: String,
    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Temperature (0.0 - 2.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Optional proxy URL applied to every request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Context window override; when absent it is inferred from the model name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.0
}

fn default_request_timeout_secs() -> u64 {
    600
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: ProviderType::OpenAI,
            api_key: None,
            base_url: None,
            model: "gpt-4o".to_string(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            proxy_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            context_window: None,
        }
    }
}

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageRole::System, text)
    }
}

/// Definition of a tool that can be called by the model.
///
/// `input_schema` is kept as raw JSON Schema because external tool servers
/// publish arbitrary schemas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Token usage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_tokens: Option<u32>,
}

impl UsageStats {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens + self.thinking_tokens.unwrap_or(0)
    }

    /// Accumulate another call's usage into this one.
    pub fn add(&mut self, other: &UsageStats) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.thinking_tokens = match (self.thinking_tokens, other.thinking_tokens) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
        };
    }
}

/// Stop reason for the response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    ContentFilter,
    Other(String),
}

impl From<&str> for StopReason {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "end_turn" | "stop" => StopReason::EndTurn,
            "max_tokens" | "length" => StopReason::MaxTokens,
            "tool_use" | "tool_calls" | "function_call" => StopReason::ToolUse,
            "content_filter" => StopReason::ContentFilter,
            other => StopReason::Other(other.to_string()),
        }
    }
}

/// Response from a model backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub usage: UsageStats,
    pub model: String,
}

impl LlmResponse {
    /// Build a plain text response. Handy for scripted backends.
    pub fn text(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            thinking: None,
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            usage: UsageStats::default(),
            model: model.into(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Error types for model backend operations
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmError {
    /// Authentication failed (invalid API key)
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },
    /// Rate limit exceeded
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<u32>,
    },
    /// Billing quota exhausted; retrying cannot help
    #[error("Quota exceeded: {message}")]
    QuotaExceeded { message: String },
    /// Model not found or not available
    #[error("Model not found: {model}")]
    ModelNotFound { model: String },
    /// Invalid request (bad parameters)
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
    /// Server error from the provider
    #[error("Server error{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    ServerError {
        message: String,
        status: Option<u16>,
    },
    /// Network/connection error
    #[error("Network error: {message}")]
    NetworkError { message: String },
    /// Response parsing error
    #[error("Parse error: {message}")]
    ParseError { message: String },
    /// Provider not reachable right now
    #[error("Provider unavailable: {message}")]
    ProviderUnavailable { message: String },
    /// Context length exceeded
    #[error("Context length exceeded: {message}")]
    ContextLengthExceeded {
        message: String,
        max_tokens: Option<u32>,
    },
    #[error("Error: {message}")]
    Other { message: String },
}

impl LlmError {
    /// Transient faults that a retry with backoff may clear.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. }
                | LlmError::ServerError { .. }
                | LlmError::NetworkError { .. }
                | LlmError::ProviderUnavailable { .. }
        )
    }

    pub fn is_context_exceeded(&self) -> bool {
        matches!(self, LlmError::ContextLengthExceeded { .. })
    }

    /// Anything that is neither retryable nor a context overflow ends the turn.
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable() && !self.is_context_exceeded()
    }

    /// Provider-supplied retry hint, in seconds.
    pub fn retry_after_secs(&self) -> Option<u32> {
        match self {
            LlmError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Result type for model backend operations
pub type LlmResult<T> = Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reason_from_openai_values() {
        assert_eq!(StopReason::from("stop"), StopReason::EndTurn);
        assert_eq!(StopReason::from("length"), StopReason::MaxTokens);
        assert_eq!(StopReason::from("tool_calls"), StopReason::ToolUse);
        assert_eq!(
            StopReason::from("weird"),
            StopReason::Other("weird".to_string())
        );
    }

    #[test]
    fn test_error_classification() {
        let rate = LlmError::RateLimited {
            message: "slow down".into(),
            retry_after: Some(3),
        };
        assert!(rate.is_retryable());
        assert!(!rate.is_fatal());
        assert_eq!(rate.retry_after_secs(), Some(3));

        let auth = LlmError::AuthenticationFailed {
            message: "bad key".into(),
        };
        assert!(auth.is_fatal());

        let quota = LlmError::QuotaExceeded {
            message: "insufficient_quota".into(),
        };
        assert!(quota.is_fatal());

        let ctx = LlmError::ContextLengthExceeded {
            message: "too long".into(),
            max_tokens: Some(8192),
        };
        assert!(ctx.is_context_exceeded());
        assert!(!ctx.is_fatal());
        assert!(!ctx.is_retryable());
    }

    #[test]
    fn test_server_error_display() {
        let err = LlmError::ServerError {
            message: "overloaded".into(),
            status: Some(503),
        };
        assert_eq!(err.to_string(), "Server error (503): overloaded");

        let err = LlmError::ServerError {
            message: "overloaded".into(),
            status: None,
        };
        assert_eq!(err.to_string(), "Server error: overloaded");
    }

    #[test]
    fn test_error_serde_tagging() {
        let err = LlmError::NetworkError {
            message: "reset".into(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "network_error");
    }

    #[test]
    fn test_usage_accumulation() {
        let mut total = UsageStats::default();
        total.add(&UsageStats {
            input_tokens: 10,
            output_tokens: 5,
            thinking_tokens: None,
        });
        total.add(&UsageStats {
            input_tokens: 1,
            output_tokens: 2,
            thinking_tokens: Some(4),
        });
        assert_eq!(total.input_tokens, 11);
        assert_eq!(total.output_tokens, 7);
        assert_eq!(total.thinking_tokens, Some(4));
        assert_eq!(total.total_tokens(), 22);
    }
}
