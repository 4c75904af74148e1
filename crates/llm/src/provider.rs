//! Model Backend Trait
//!
//! Defines the capability the orchestrator consumes to talk to a language
//! model. The wire format stays behind this trait.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{
    LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, ToolDefinition,
};
use editflow_core::streaming::UnifiedStreamEvent;

/// Trait that all model backends must implement.
///
/// Provides a unified interface for:
/// - Batched completions (`complete`)
/// - Streaming completions (`stream`)
///
/// Both forms report token usage on the returned `LlmResponse`.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Returns the provider name for identification.
    fn name(&self) -> &'static str;

    /// Returns the current model being used.
    fn model(&self) -> &str;

    /// Returns the model's context window size in tokens. Default: 128,000.
    fn context_window(&self) -> u32 {
        128_000
    }

    /// Send the conversation and wait for the complete response.
    async fn complete(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse>;

    /// Stream the response through `tx`, returning the fully accumulated
    /// response once the stream ends.
    async fn stream(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse>;
}

/// Helper function to create an error for missing API key
pub fn missing_api_key_error(provider: &str) -> LlmError {
    LlmError::AuthenticationFailed {
        message: format!("API key not configured for {}", provider),
    }
}

/// Map an HTTP error status and body to an `LlmError`.
///
/// OpenAI-style bodies carry an `error.code`; context-length and quota codes
/// are distinguished from their generic status class.
pub fn parse_http_error(
    status: u16,
    body: &str,
    provider: &str,
    retry_after: Option<u32>,
) -> LlmError {
    let lowered = body.to_ascii_lowercase();
    match status {
        401 => LlmError::AuthenticationFailed {
            message: format!("{}: Invalid API key", provider),
        },
        403 => LlmError::AuthenticationFailed {
            message: format!("{}: Access denied", provider),
        },
        404 => LlmError::ModelNotFound {
            model: body.to_string(),
        },
        429 if lowered.contains("insufficient_quota") => LlmError::QuotaExceeded {
            message: body.to_string(),
        },
        429 => LlmError::RateLimited {
            message: body.to_string(),
            retry_after,
        },
        400 | 413 if is_context_overflow(&lowered) => LlmError::ContextLengthExceeded {
            message: body.to_string(),
            max_tokens: None,
        },
        400 => LlmError::InvalidRequest {
            message: body.to_string(),
        },
        500..=599 => LlmError::ServerError {
            message: body.to_string(),
            status: Some(status),
        },
        _ => LlmError::Other {
            message: format!("HTTP {}: {}", status, body),
        },
    }
}

fn is_context_overflow(lowered_body: &str) -> bool {
    lowered_body.contains("context_length_exceeded")
        || lowered_body.contains("maximum context length")
        || lowered_body.contains("request too large")
        || (lowered_body.contains("too many tokens") && lowered_body.contains("context"))
}
