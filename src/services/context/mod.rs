//! Context Assembly
//!
//! - `formatter` - ordered segments and the token budget check
//! - `prompts` - per-format system prompts, examples and reminders
//! - `summarizer` - history shrinking after a context overflow

pub mod formatter;
pub mod prompts;
pub mod summarizer;

pub use formatter::{
    estimate_tokens, ContextBundle, ContextExceeded, ContextFormatter, FileSet, FileSnapshot,
    Segment, SegmentKind,
};
pub use summarizer::{HistorySummarizer, ModelSummarizer, SlidingWindowSummarizer};
