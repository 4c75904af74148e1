//! editflow Core
//!
//! Foundational error types and stream event definitions shared by every
//! crate in the editflow workspace. This crate depends on nothing else in
//! the workspace.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `streaming` - Unified stream event types and the provider adapter trait

pub mod error;
pub mod streaming;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Streaming Types ────────────────────────────────────────────────────
pub use streaming::{AdapterError, StreamAdapter, UnifiedStreamEvent};
