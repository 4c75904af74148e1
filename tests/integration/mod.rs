//! Integration Tests Module
//!
//! End-to-end tests for editflow: full turns through the reflection loop,
//! edit formats against a real tree, context assembly, the model gateway,
//! and the MCP client over an in-memory transport.

// Scripted backend, fake gate collaborators and fixtures
mod common;

// Reflection coordinator turns
mod coordinator_test;

// Edit formats and the apply engine
mod apply_test;

// Context formatter and repo map
mod formatter_test;

// Model gateway streaming and cancellation
mod gateway_test;

// MCP client and tool bridge
mod mcp_test;
