//! OpenAI Provider
//!
//! `ModelBackend` implementation for OpenAI's chat-completions API and any
//! server that speaks the same wire format.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::provider::{missing_api_key_error, parse_http_error, ModelBackend};
use super::types::{
    LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, ProviderConfig, ProviderType,
    StopReason, ToolCall, ToolDefinition, UsageStats,
};
use crate::http_client::build_http_client;
use crate::streaming_adapters::OpenAIAdapter;
use editflow_core::streaming::{StreamAdapter, UnifiedStreamEvent};

/// Default OpenAI API endpoint
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI provider
pub struct OpenAIProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = build_http_client(config.proxy_url.as_deref(), config.request_timeout_secs)?;
        Ok(Self { config, client })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(OPENAI_API_URL)
    }

    /// o1/o3/o4 reasoning models reject `temperature`.
    fn model_supports_reasoning(&self) -> bool {
        let model = self.config.model.to_lowercase();
        model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4")
    }

    fn build_request_body(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        stream: bool,
        options: &LlmRequestOptions,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": options.max_tokens_override.unwrap_or(self.config.max_tokens),
            "stream": stream,
        });

        if !self.model_supports_reasoning() {
            body["temperature"] =
                serde_json::json!(options.temperature_override.unwrap_or(self.config.temperature));
        }

        let openai_messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                })
            })
            .collect();
        body["messages"] = serde_json::json!(openai_messages);

        if !tools.is_empty() {
            let openai_tools: Vec<serde_json::Value> =
                tools.iter().map(|t| self.tool_to_openai(t)).collect();
            body["tools"] = serde_json::json!(openai_tools);
        }

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        body
    }

    fn tool_to_openai(&self, tool: &ToolDefinition) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema
            }
        })
    }

    fn parse_response(&self, response: &OpenAIResponse) -> LlmResponse {
        let choice = response.choices.first();

        let mut content = None;
        let mut thinking = None;
        let mut tool_calls = Vec::new();

        if let Some(msg) = choice.and_then(|c| c.message.as_ref()) {
            content = msg.content.clone();
            thinking = msg.reasoning_content.clone();

            for tc in msg.tool_calls.iter().flatten() {
                let arguments = serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::Null);
                tool_calls.push(ToolCall {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    arguments,
                });
            }
        }

        let stop_reason = choice
            .and_then(|c| c.finish_reason.as_ref())
            .map(|r| StopReason::from(r.as_str()))
            .unwrap_or(StopReason::EndTurn);

        let usage = response
            .usage
            .as_ref()
            .map(|u| UsageStats {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
                thinking_tokens: u.reasoning_tokens,
            })
            .unwrap_or_default();

        LlmResponse {
            content,
            thinking,
            tool_calls,
            stop_reason,
            usage,
            model: response.model.clone(),
        }
    }

    async fn post(&self, body: &serde_json::Value) -> LlmResult<reqwest::Response> {
        let mut request = self
            .client
            .post(self.base_url())
            .header("Content-Type", "application/json")
            .json(body);

        match (&self.config.api_key, self.config.provider) {
            (Some(key), _) => {
                request = request.header("Authorization", format!("Bearer {}", key));
            }
            (None, ProviderType::OpenAI) => return Err(missing_api_key_error("openai")),
            // Local compatible servers commonly run without auth
            (None, ProviderType::OpenAICompatible) => {}
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                LlmError::ProviderUnavailable {
                    message: e.to_string(),
                }
            } else {
                LlmError::NetworkError {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        if status != 200 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u32>().ok());
            let body_text = response.text().await.unwrap_or_default();
            warn!(status, provider = self.name(), "model backend returned an error status");
            return Err(parse_http_error(status, &body_text, self.name(), retry_after));
        }

        Ok(response)
    }
}

#[async_trait]
impl ModelBackend for OpenAIProvider {
    fn name(&self) -> &'static str {
        match self.config.provider {
            ProviderType::OpenAI => "openai",
            ProviderType::OpenAICompatible => "openai_compatible",
        }
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn context_window(&self) -> u32 {
        if let Some(window) = self.config.context_window {
            return window;
        }
        let model = self.config.model.to_lowercase();
        if model.contains("o1") || model.contains("o3") || model.contains("o4") {
            200_000
        } else if model.contains("gpt-4.1") {
            1_047_576
        } else if model.contains("gpt-4o") || model.contains("gpt-4-turbo") {
            128_000
        } else if model.contains("gpt-4-32k") {
            32_768
        } else if model.contains("gpt-4") {
            8_192
        } else if model.contains("gpt-3.5") {
            16_384
        } else {
            128_000
        }
    }

    async fn complete(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let body = self.build_request_body(&messages, &tools, false, &options);
        let response = self.post(&body).await?;

        let body_text = response.text().await.map_err(|e| LlmError::NetworkError {
            message: e.to_string(),
        })?;

        let openai_response: OpenAIResponse =
            serde_json::from_str(&body_text).map_err(|e| LlmError::ParseError {
                message: format!("Failed to parse response: {}", e),
            })?;

        Ok(self.parse_response(&openai_response))
    }

    async fn stream(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let body = self.build_request_body(&messages, &tools, true, &options);
        let response = self.post(&body).await?;

        let mut adapter = OpenAIAdapter::new();
        let mut accumulated_content = String::new();
        let mut accumulated_thinking = String::new();
        let mut tool_calls = Vec::new();
        let mut usage = UsageStats::default();
        let mut stop_reason = StopReason::EndTurn;

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::NetworkError {
                message: e.to_string(),
            })?;

            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].to_string();
                buffer.drain(..=line_end);

                if line.trim().is_empty() {
                    continue;
                }

                let events = match adapter.adapt(&line) {
                    Ok(events) => events,
                    Err(e) => {
                        debug!(error = %e, "skipping unparseable SSE line");
                        let _ = tx
                            .send(UnifiedStreamEvent::Error {
                                message: e.to_string(),
                                code: None,
                            })
                            .await;
                        continue;
                    }
                };

                for event in events {
                    match &event {
                        UnifiedStreamEvent::TextDelta { content } => {
                            accumulated_content.push_str(content);
                        }
                        UnifiedStreamEvent::ThinkingDelta { content } => {
                            accumulated_thinking.push_str(content);
                        }
                        UnifiedStreamEvent::ToolComplete {
                            tool_id,
                            tool_name,
                            arguments,
                        } => {
                            let input = serde_json::from_str(arguments)
                                .unwrap_or(serde_json::Value::Null);
                            tool_calls.push(ToolCall {
                                id: tool_id.clone(),
                                name: tool_name.clone(),
                                arguments: input,
                            });
                        }
                        UnifiedStreamEvent::Usage {
                            input_tokens,
                            output_tokens,
                            thinking_tokens,
                        } => {
                            usage.input_tokens = *input_tokens;
                            usage.output_tokens = *output_tokens;
                            usage.thinking_tokens = *thinking_tokens;
                        }
                        UnifiedStreamEvent::Complete {
                            stop_reason: Some(reason),
                        } => {
                            stop_reason = StopReason::from(reason.as_str());
                        }
                        _ => {}
                    }

                    // A closed receiver only means nobody is watching.
                    let _ = tx.send(event).await;
                }
            }
        }

        // Trailing data without a final newline
        if !buffer.trim().is_empty() {
            if let Ok(events) = adapter.adapt(&buffer) {
                for event in events {
                    if let UnifiedStreamEvent::TextDelta { content } = &event {
                        accumulated_content.push_str(content);
                    }
                    let _ = tx.send(event).await;
                }
            }
        }

        Ok(LlmResponse {
            content: (!accumulated_content.is_empty()).then_some(accumulated_content),
            thinking: (!accumulated_thinking.is_empty()).then_some(accumulated_thinking),
            tool_calls,
            stop_reason,
            usage,
            model: self.config.model.clone(),
        })
    }
}

/// OpenAI API response format
#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    reasoning_tokens: Option<u32>,
}
