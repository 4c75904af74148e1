//! Unified Stream Event Types
//!
//! Provider-agnostic events emitted while a model response streams in, plus
//! the progress events the reflection coordinator publishes during a turn.
//! The LLM crate converts provider wire formats into these; display layers
//! consume them.

use serde::{Deserialize, Serialize};

/// Unified streaming event that all provider adapters convert to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnifiedStreamEvent {
    /// Text content delta from the model
    TextDelta { content: String },

    /// Start of a reasoning block
    ThinkingStart,

    /// Reasoning content delta
    ThinkingDelta { content: String },

    /// End of a reasoning block
    ThinkingEnd,

    /// Start of a tool call
    ToolStart { tool_id: String, tool_name: String },

    /// Tool call complete with accumulated arguments
    ToolComplete {
        tool_id: String,
        tool_name: String,
        /// Complete JSON string of tool arguments
        arguments: String,
    },

    /// Token usage information
    Usage {
        input_tokens: u32,
        output_tokens: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        thinking_tokens: Option<u32>,
    },

    /// Error during streaming
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// Stream complete
    Complete {
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },

    // ========================================================================
    // Turn progress events (emitted by the reflection coordinator)
    // ========================================================================
    /// The coordinator entered a new state
    TurnState { state: String },

    /// Edits landed on disk
    EditsApplied {
        files: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        failed: Vec<String>,
    },

    /// A quality gate stage finished
    GateCompleted { stage: String, status: String },

    /// A corrective retry was scheduled
    ReflectionTriggered { kind: String, count: u32 },
}

impl UnifiedStreamEvent {
    /// Whether this event carries model output rather than turn progress.
    pub fn is_model_output(&self) -> bool {
        matches!(
            self,
            UnifiedStreamEvent::TextDelta { .. }
                | UnifiedStreamEvent::ThinkingStart
                | UnifiedStreamEvent::ThinkingDelta { .. }
                | UnifiedStreamEvent::ThinkingEnd
        )
    }
}

/// Errors that can occur during stream adaptation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AdapterError {
    /// Invalid format that couldn't be parsed
    InvalidFormat(String),
    /// JSON/data parsing error
    ParseError(String),
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterError::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),
            AdapterError::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for AdapterError {}

/// Trait for adapting provider-specific stream formats to unified events.
pub trait StreamAdapter: Send + Sync {
    /// Returns the provider name for logging and identification.
    fn provider_name(&self) -> &'static str;

    /// Adapt a raw stream line to unified events.
    ///
    /// A single input line may produce zero, one, or multiple events.
    fn adapt(&mut self, input: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError>;

    /// Reset adapter state for a new stream.
    fn reset(&mut self) {}
}
