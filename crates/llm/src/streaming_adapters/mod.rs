//! Provider-Specific Stream Adapters
//!
//! Each adapter handles the streaming wire format of its provider.

pub mod openai;

pub use openai::OpenAIAdapter;
