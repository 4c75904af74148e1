//! Model Gateway
//!
//! Sends an assembled context to the model backend and returns the complete
//! reply. Backend failures are classified into four outcomes; transient ones
//! are retried with exponential backoff, and every wait races the
//! cancellation token.
//!
//! In streaming mode a forwarder task buffers text deltas and relays model
//! output to an optional display sink. The completion is only produced once
//! the stream has been fully drained.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use editflow_core::UnifiedStreamEvent;
use editflow_llm::{
    LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, ModelBackend, ToolCall,
    ToolDefinition, UsageStats,
};

use crate::models::settings::RetrySettings;
use crate::services::context::ContextBundle;

/// Capacity of the channel between the backend and the forwarder
const STREAM_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelError {
    /// A transient failure that persisted through every retry
    #[error("model request failed after {attempts} attempts: {message}")]
    Retryable { message: String, attempts: u32 },

    #[error("model request failed: {message}")]
    Fatal { message: String },

    #[error("model context window exceeded: {message}")]
    ContextExceeded { message: String },

    #[error("model request interrupted")]
    Interrupted,
}

/// Full reply from one successful request
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: UsageStats,
    pub model: String,
    /// Requests made, including failed ones
    pub attempts: u32,
}

/// Sink for streamed model output and turn progress
pub type DisplaySink = mpsc::UnboundedSender<UnifiedStreamEvent>;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub randomization: f64,
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_delay)
            .with_multiplier(self.multiplier)
            .with_max_interval(self.max_delay)
            .with_randomization_factor(self.randomization)
            .with_max_elapsed_time(None)
            .build()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            multiplier: settings.multiplier,
            max_delay: Duration::from_millis(settings.max_delay_ms),
            randomization: settings.randomization.clamp(0.0, 1.0),
        }
    }
}

fn classify(err: &LlmError, attempts: u32) -> ModelError {
    if err.is_context_exceeded() {
        ModelError::ContextExceeded {
            message: err.to_string(),
        }
    } else if err.is_retryable() {
        ModelError::Retryable {
            message: err.to_string(),
            attempts,
        }
    } else {
        ModelError::Fatal {
            message: err.to_string(),
        }
    }
}

// ============================================================================
// ModelGateway
// ============================================================================

pub struct ModelGateway {
    backend: Arc<dyn ModelBackend>,
    retry: RetryPolicy,
    tools: Vec<ToolDefinition>,
    display: Option<DisplaySink>,
}

impl ModelGateway {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            backend,
            retry: RetryPolicy::default(),
            tools: Vec::new(),
            display: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_display(mut self, display: DisplaySink) -> Self {
        self.display = Some(display);
        self
    }

    /// Tool definitions offered with every request
    pub fn set_tools(&mut self, tools: Vec<ToolDefinition>) {
        self.tools = tools;
    }

    pub fn context_window(&self) -> u32 {
        self.backend.context_window()
    }

    pub async fn send(
        &self,
        bundle: &ContextBundle,
        streaming: bool,
        cancel: &CancellationToken,
    ) -> Result<Completion, ModelError> {
        let messages = bundle.messages();
        let mut backoff = self.retry.backoff();
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(ModelError::Interrupted);
            }
            attempts += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ModelError::Interrupted),
                result = self.request(messages.clone(), streaming) => result,
            };

            let err = match result {
                Ok((response, buffered)) => {
                    debug!(
                        model = %response.model,
                        attempts,
                        input_tokens = response.usage.input_tokens,
                        output_tokens = response.usage.output_tokens,
                        "model request completed"
                    );
                    return Ok(completion(response, buffered, attempts));
                }
                Err(err) => err,
            };

            let classified = classify(&err, attempts);
            if !matches!(classified, ModelError::Retryable { .. }) {
                warn!(error = %err, "model request failed");
                return Err(classified);
            }
            if attempts >= self.retry.max_attempts {
                warn!(error = %err, attempts, "model request retries exhausted");
                return Err(classified);
            }

            let computed = backoff.next_backoff().unwrap_or(self.retry.max_delay);
            let delay = err
                .retry_after_secs()
                .map(|secs| Duration::from_secs(u64::from(secs)))
                .unwrap_or(computed);
            warn!(
                error = %err,
                attempt = attempts,
                max_attempts = self.retry.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "retrying model request"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ModelError::Interrupted),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One backend call. Returns the response plus any streamed text.
    async fn request(
        &self,
        messages: Vec<Message>,
        streaming: bool,
    ) -> LlmResult<(LlmResponse, String)> {
        if !streaming {
            let response = self
                .backend
                .complete(messages, self.tools.clone(), LlmRequestOptions::default())
                .await?;
            return Ok((response, String::new()));
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let forwarder = tokio::spawn(forward_stream(rx, self.display.clone()));

        // The sender moves into the backend call, so the forwarder sees the
        // channel close once the backend (and anything it spawned) is done.
        let result = self
            .backend
            .stream(messages, self.tools.clone(), tx, LlmRequestOptions::default())
            .await;

        let buffered = match forwarder.await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "stream forwarder failed");
                String::new()
            }
        };
        result.map(|response| (response, buffered))
    }
}

async fn forward_stream(
    mut rx: mpsc::Receiver<UnifiedStreamEvent>,
    display: Option<DisplaySink>,
) -> String {
    let mut buffer = String::new();
    while let Some(event) = rx.recv().await {
        if let UnifiedStreamEvent::TextDelta { content } = &event {
            buffer.push_str(content);
        }
        if event.is_model_output() {
            if let Some(sink) = &display {
                // A closed display must not stop buffering
                let _ = sink.send(event);
            }
        }
    }
    buffer
}

fn completion(response: LlmResponse, buffered: String, attempts: u32) -> Completion {
    let text = if buffered.is_empty() {
        response.content.unwrap_or_default()
    } else {
        buffered
    };
    Completion {
        text,
        tool_calls: response.tool_calls,
        usage: response.usage,
        model: response.model,
        attempts,
    }
}
