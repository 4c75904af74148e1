//! Services
//!
//! The editing pipeline, leaves first:
//! - `edit` - response parsers for each edit format
//! - `apply` - dry-run validation and atomic per-file writes
//! - `context` - prompt assembly, token budget, history summarization
//! - `gateway` - backend calls with retry, streaming and cancellation
//! - `repo_map` - repository listing for the context
//! - `reflection` - the turn state machine and its coordinator

pub mod apply;
pub mod context;
pub mod edit;
pub mod gateway;
pub mod reflection;
pub mod repo_map;

pub use apply::{ApplyEngine, ApplyPlan};
pub use context::{ContextBundle, ContextFormatter, HistorySummarizer};
pub use edit::{extract_shell_commands, ParseContext};
pub use gateway::{Completion, ModelError, ModelGateway, RetryPolicy};
pub use reflection::{CoordinatorConfig, ReflectionCoordinator};
pub use repo_map::{FileListRepoMap, RepoMap};
