//! History Summarization
//!
//! Shrinks prior-turn history when the context does not fit. Only invoked
//! on a context overflow, at most once per turn.
//!
//! - `SlidingWindowSummarizer` keeps the head and tail and replaces the
//!   middle with a marker message.
//! - `ModelSummarizer` asks the backend to summarize the middle and falls
//!   back to the sliding window on any error.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use editflow_llm::{LlmRequestOptions, Message, MessageRole, ModelBackend};

#[async_trait]
pub trait HistorySummarizer: Send + Sync {
    /// Return a shorter history. The input is not modified.
    async fn summarize(&self, history: &[Message]) -> Vec<Message>;

    fn name(&self) -> &str;
}

// ============================================================================
// SlidingWindowSummarizer
// ============================================================================

#[derive(Debug, Clone)]
pub struct SlidingWindowSummarizer {
    preserve_head: usize,
    preserve_tail: usize,
}

impl SlidingWindowSummarizer {
    pub fn new(preserve_head: usize, preserve_tail: usize) -> Self {
        Self {
            preserve_head,
            preserve_tail,
        }
    }

    fn split<'a>(&self, history: &'a [Message]) -> Option<(&'a [Message], &'a [Message], &'a [Message])> {
        if history.len() <= self.preserve_head + self.preserve_tail {
            return None;
        }
        let tail_start = history.len() - self.preserve_tail;
        Some((
            &history[..self.preserve_head],
            &history[self.preserve_head..tail_start],
            &history[tail_start..],
        ))
    }

    fn compact(&self, history: &[Message]) -> Vec<Message> {
        let Some((head, middle, tail)) = self.split(history) else {
            return history.to_vec();
        };
        let mut out = Vec::with_capacity(head.len() + tail.len() + 1);
        out.extend_from_slice(head);
        out.push(Message::user(format!(
            "[{} earlier messages were removed to fit the context window.]",
            middle.len()
        )));
        out.extend_from_slice(tail);
        out
    }
}

impl Default for SlidingWindowSummarizer {
    fn default() -> Self {
        Self::new(2, 4)
    }
}

#[async_trait]
impl HistorySummarizer for SlidingWindowSummarizer {
    async fn summarize(&self, history: &[Message]) -> Vec<Message> {
        let compacted = self.compact(history);
        debug!(before = history.len(), after = compacted.len(), "history compacted");
        compacted
    }

    fn name(&self) -> &str {
        "sliding_window"
    }
}

// ============================================================================
// ModelSummarizer
// ============================================================================

const SUMMARY_PROMPT: &str = "Briefly summarize this partial conversation about programming.
Include less detail about older parts and more detail about the most recent messages.
Keep function names, library names, file names and any decisions that were made.
Write the summary in the first person, as the user talking to the assistant.";

pub struct ModelSummarizer {
    backend: Arc<dyn ModelBackend>,
    window: SlidingWindowSummarizer,
}

impl ModelSummarizer {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            backend,
            window: SlidingWindowSummarizer::default(),
        }
    }

    pub fn with_window(mut self, window: SlidingWindowSummarizer) -> Self {
        self.window = window;
        self
    }
}

#[async_trait]
impl HistorySummarizer for ModelSummarizer {
    async fn summarize(&self, history: &[Message]) -> Vec<Message> {
        let Some((head, middle, tail)) = self.window.split(history) else {
            return history.to_vec();
        };

        let mut transcript = String::new();
        for message in middle {
            let speaker = match message.role {
                MessageRole::Assistant => "ASSISTANT",
                MessageRole::User => "USER",
                MessageRole::System => continue,
            };
            transcript.push_str(&format!("# {}\n{}\n\n", speaker, message.content));
        }

        let request = vec![Message::system(SUMMARY_PROMPT), Message::user(transcript)];
        match self
            .backend
            .complete(request, Vec::new(), LlmRequestOptions::default())
            .await
        {
            Ok(response) => match response.content.filter(|c| !c.trim().is_empty()) {
                Some(summary) => {
                    let mut out = Vec::with_capacity(head.len() + tail.len() + 1);
                    out.extend_from_slice(head);
                    out.push(Message::user(format!(
                        "[Summary of {} earlier messages]\n{}",
                        middle.len(),
                        summary.trim()
                    )));
                    out.extend_from_slice(tail);
                    out
                }
                None => {
                    warn!("summarization returned no text, using sliding window");
                    self.window.compact(history)
                }
            },
            Err(e) => {
                warn!(error = %e, "summarization failed, using sliding window");
                self.window.compact(history)
            }
        }
    }

    fn name(&self) -> &str {
        "model"
    }
}
