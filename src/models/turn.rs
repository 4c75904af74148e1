//! Turn Models
//!
//! One user request and its processing lifecycle, plus the result handed
//! back to the caller.

use serde::{Deserialize, Serialize};

use editflow_llm::{Message, MessageRole, UsageStats};

/// A request being processed. Owned by the coordinator for its lifetime.
#[derive(Debug, Clone)]
pub struct Turn {
    pub request: String,
    /// Corrective retries so far; never decreases within a turn
    pub reflection_count: u32,
    /// Assistant replies and corrective messages since the request
    pub exchange: Vec<Message>,
    /// Whether the one history summarization has been spent
    pub summarized: bool,
    /// Tool-only rounds so far
    pub tool_rounds: u32,
}

impl Turn {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            reflection_count: 0,
            exchange: Vec::new(),
            summarized: false,
            tool_rounds: 0,
        }
    }

    /// Last assistant reply in this turn
    pub fn last_reply(&self) -> Option<&str> {
        self.exchange
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
            .map(|m| m.content.as_str())
    }
}

/// How a turn ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnOutcome {
    Success,
    /// The reflection ceiling was reached with a corrective signal still pending
    MaxReflections,
    Fatal { message: String },
    /// The context still did not fit after the one summarization
    ContextExceeded { message: String },
    Interrupted,
}

impl TurnOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for TurnOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::MaxReflections => write!(f, "stopped after reaching the reflection limit"),
            Self::Fatal { message } => write!(f, "failed: {}", message),
            Self::ContextExceeded { message } => write!(f, "context too large: {}", message),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// What `run_turn` returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    /// Files written during the turn, in first-write order
    pub files_changed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    /// Problems left unaddressed (declined lint/test findings, gate errors)
    pub residual_errors: Vec<String>,
    pub reflection_count: u32,
    pub outcome: TurnOutcome,
    /// Token usage summed over every backend call in the turn
    pub usage: UsageStats,
}
