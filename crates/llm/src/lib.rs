//! editflow LLM
//!
//! The model-backend seam used by the editflow orchestrator:
//! - `ModelBackend` - batched and streaming completion capability
//! - `types` - messages, tool definitions, usage, and the `LlmError` taxonomy
//! - `OpenAIProvider` - OpenAI-compatible chat completions over HTTP/SSE
//!
//! Also includes the SSE stream adapter and the HTTP client factory.

pub mod http_client;
pub mod openai;
pub mod provider;
pub mod streaming_adapters;
pub mod types;

pub use http_client::build_http_client;
pub use openai::OpenAIProvider;
pub use provider::ModelBackend;
pub use streaming_adapters::OpenAIAdapter;
pub use types::*;
