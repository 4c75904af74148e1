//! OpenAI SSE Adapter
//!
//! Handles the chat-completions SSE format, including `reasoning_content`
//! deltas and incrementally streamed tool calls.

use editflow_core::streaming::{AdapterError, StreamAdapter, UnifiedStreamEvent};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct OpenAIEvent {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    reasoning_tokens: Option<u32>,
}

/// Adapter for OpenAI-compatible SSE streams
pub struct OpenAIAdapter {
    in_reasoning: bool,
    tool_id: Option<String>,
    tool_name: Option<String>,
    tool_args_buffer: String,
}

impl OpenAIAdapter {
    pub fn new() -> Self {
        Self {
            in_reasoning: false,
            tool_id: None,
            tool_name: None,
            tool_args_buffer: String::new(),
        }
    }

    /// Flush any pending tool call, emitting a ToolComplete event
    fn flush_pending_tool(&mut self) -> Option<UnifiedStreamEvent> {
        if let (Some(id), Some(name)) = (self.tool_id.take(), self.tool_name.take()) {
            let args = std::mem::take(&mut self.tool_args_buffer);
            Some(UnifiedStreamEvent::ToolComplete {
                tool_id: id,
                tool_name: name,
                arguments: args,
            })
        } else {
            None
        }
    }

    fn close_reasoning(&mut self, events: &mut Vec<UnifiedStreamEvent>) {
        if self.in_reasoning {
            self.in_reasoning = false;
            events.push(UnifiedStreamEvent::ThinkingEnd);
        }
    }
}

impl Default for OpenAIAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAdapter for OpenAIAdapter {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn adapt(&mut self, input: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError> {
        let trimmed = input.trim();

        // SSE comments (": keep-alive") and event-name lines carry no data
        if trimmed.is_empty() || trimmed.starts_with(':') || trimmed.starts_with("event:") {
            return Ok(vec![]);
        }

        let json_str = trimmed
            .strip_prefix("data:")
            .map(str::trim_start)
            .unwrap_or(trimmed);

        if json_str.is_empty() || json_str == "[DONE]" {
            let mut events = vec![];
            if let Some(tool_event) = self.flush_pending_tool() {
                events.push(tool_event);
            }
            self.close_reasoning(&mut events);
            return Ok(events);
        }

        let event: OpenAIEvent =
            serde_json::from_str(json_str).map_err(|e| AdapterError::ParseError(e.to_string()))?;

        let mut events = vec![];

        if let Some(usage) = event.usage {
            events.push(UnifiedStreamEvent::Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                thinking_tokens: usage.reasoning_tokens,
            });
        }

        for choice in event.choices {
            if let Some(delta) = choice.delta {
                if let Some(reasoning) = delta.reasoning_content {
                    if !reasoning.is_empty() {
                        if !self.in_reasoning {
                            self.in_reasoning = true;
                            events.push(UnifiedStreamEvent::ThinkingStart);
                        }
                        events.push(UnifiedStreamEvent::ThinkingDelta { content: reasoning });
                    }
                }

                if let Some(content) = delta.content {
                    if !content.is_empty() {
                        self.close_reasoning(&mut events);
                        events.push(UnifiedStreamEvent::TextDelta { content });
                    }
                }

                if let Some(tool_calls) = delta.tool_calls {
                    for tc in tool_calls {
                        if let Some(id) = tc.id {
                            // New tool call starting, flush the previous one
                            if let Some(tool_event) = self.flush_pending_tool() {
                                events.push(tool_event);
                            }
                            self.tool_id = Some(id.clone());
                            self.tool_name = tc.function.as_ref().and_then(|f| f.name.clone());
                            self.tool_args_buffer.clear();

                            if let Some(name) = &self.tool_name {
                                events.push(UnifiedStreamEvent::ToolStart {
                                    tool_id: id,
                                    tool_name: name.clone(),
                                });
                            }
                        }

                        if let Some(args) = tc.function.and_then(|f| f.arguments) {
                            self.tool_args_buffer.push_str(&args);
                        }
                    }
                }
            }

            if let Some(finish_reason) = choice.finish_reason {
                if let Some(tool_event) = self.flush_pending_tool() {
                    events.push(tool_event);
                }
                self.close_reasoning(&mut events);
                events.push(UnifiedStreamEvent::Complete {
                    stop_reason: Some(finish_reason),
                });
            }
        }

        Ok(events)
    }

    fn reset(&mut self) {
        self.in_reasoning = false;
        self.tool_id = None;
        self.tool_name = None;
        self.tool_args_buffer.clear();
    }
}
