//! Edit Models
//!
//! The format-agnostic representation of a proposed file change, plus the
//! failure and outcome types the apply engine reports.

use serde::{Deserialize, Serialize};

/// Edit format requested from the model, selected once per turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EditFormat {
    /// Path line plus SEARCH/REPLACE blocks
    #[default]
    SearchReplace,
    /// `---`/`+++` headers and `@@` hunks
    UnifiedDiff,
    /// Path line plus a fenced block holding the full file
    WholeFile,
    /// JSON `{"edits": [...]}` records
    StructuredPatch,
}

impl EditFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SearchReplace => "search_replace",
            Self::UnifiedDiff => "unified_diff",
            Self::WholeFile => "whole_file",
            Self::StructuredPatch => "structured_patch",
        }
    }
}

impl std::fmt::Display for EditFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EditFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "search_replace" | "diff" => Ok(Self::SearchReplace),
            "unified_diff" | "udiff" => Ok(Self::UnifiedDiff),
            "whole_file" | "whole" => Ok(Self::WholeFile),
            "structured_patch" | "json" => Ok(Self::StructuredPatch),
            other => Err(format!("unknown edit format: {}", other)),
        }
    }
}

/// 1-based inclusive line range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Empty span just after line `after` (0 means the top of the file)
    pub fn insertion(after: usize) -> Self {
        Self {
            start: after + 1,
            end: after,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.start >= 1 && self.end >= self.start
    }

    pub fn is_insertion(&self) -> bool {
        self.start == self.end + 1
    }
}

/// Kind of change an edit makes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    /// Replace an anchored span (or an explicit range) inside an existing file
    ReplaceRange,
    /// Overwrite the whole file
    WholeFileWrite,
    /// Create a new file (or fill an empty one)
    Create,
    Delete,
}

impl std::fmt::Display for EditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ReplaceRange => "replace",
            Self::WholeFileWrite => "write",
            Self::Create => "create",
            Self::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

/// One atomic file change parsed from model output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOperation {
    /// Repo-relative target path
    pub path: String,
    pub kind: EditKind,
    /// Original-content fragment that must match before applying
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    /// Line range; a position hint unless `range_exact` is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<LineRange>,
    /// Replace exactly `range`, verifying `anchor` there if present
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub range_exact: bool,
    /// New text
    pub content: String,
}

impl EditOperation {
    pub fn replace(
        path: impl Into<String>,
        anchor: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            kind: EditKind::ReplaceRange,
            anchor: Some(anchor.into()),
            range: None,
            range_exact: false,
            content: content.into(),
        }
    }

    pub fn write(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EditKind::WholeFileWrite,
            anchor: None,
            range: None,
            range_exact: false,
            content: content.into(),
        }
    }

    pub fn create(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EditKind::Create,
            anchor: None,
            range: None,
            range_exact: false,
            content: content.into(),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EditKind::Delete,
            anchor: None,
            range: None,
            range_exact: false,
            content: String::new(),
        }
    }

    /// Insert `content` after line `after` without matching any text
    pub fn insert_after(path: impl Into<String>, after: usize, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EditKind::ReplaceRange,
            anchor: None,
            range: Some(LineRange::insertion(after)),
            range_exact: true,
            content: content.into(),
        }
    }

    /// Attach a line hint used to pick among several anchor matches
    pub fn with_range(mut self, range: LineRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Pin the edit to exactly these lines
    pub fn with_exact_range(mut self, range: LineRange) -> Self {
        self.range = Some(range);
        self.range_exact = true;
        self
    }
}

/// A parse or validation failure, fed back to the model as a reflection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedEdit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// The offending text as the model wrote it
    pub fragment: String,
    pub reason: String,
    /// Suggestion quoting the actual file content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Further failures folded into this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional: Vec<MalformedEdit>,
}

impl MalformedEdit {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            path: None,
            fragment: String::new(),
            reason: reason.into(),
            hint: None,
            additional: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragment = fragment.into();
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Fold several failures into one. Returns `None` for an empty list.
    pub fn combine(errors: Vec<MalformedEdit>) -> Option<Self> {
        let mut iter = errors.into_iter().flat_map(MalformedEdit::flatten);
        let mut head = iter.next()?;
        head.additional = iter.collect();
        Some(head)
    }

    /// This failure followed by every folded one, without nesting.
    pub fn flatten(mut self) -> Vec<MalformedEdit> {
        let additional = std::mem::take(&mut self.additional);
        let mut out = vec![self];
        out.extend(additional.into_iter().flat_map(MalformedEdit::flatten));
        out
    }

    /// Number of failures including folded ones.
    pub fn count(&self) -> usize {
        1 + self.additional.iter().map(MalformedEdit::count).sum::<usize>()
    }

    /// Every file named by this failure or a folded one.
    pub fn paths(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        if let Some(path) = self.path.as_deref() {
            out.push(path);
        }
        for other in &self.additional {
            for path in other.paths() {
                if !out.contains(&path) {
                    out.push(path);
                }
            }
        }
        out
    }

    /// Markdown section for a single failure (folded ones excluded).
    pub fn render(&self) -> String {
        let mut out = match &self.path {
            Some(path) => format!("## Edit to {} failed: {}\n", path, self.reason),
            None => format!("## Edit failed: {}\n", self.reason),
        };
        if !self.fragment.trim().is_empty() {
            out.push_str("\n```\n");
            out.push_str(self.fragment.trim_end_matches('\n'));
            out.push_str("\n```\n");
        }
        if let Some(hint) = &self.hint {
            out.push('\n');
            out.push_str(hint.trim_end_matches('\n'));
            out.push('\n');
        }
        out
    }
}

impl std::fmt::Display for MalformedEdit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", path, self.reason)?,
            None => write!(f, "{}", self.reason)?,
        }
        if !self.additional.is_empty() {
            write!(f, " (+{} more)", self.additional.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for MalformedEdit {}

/// A file the apply engine actually wrote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub kind: EditKind,
    /// Unified diff of the change
    pub diff: String,
}

/// Per-file outcome of one apply pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub applied: Vec<FileChange>,
    pub failed: Vec<MalformedEdit>,
}

impl ApplyResult {
    /// Paths written to disk, in apply order
    pub fn files_touched(&self) -> Vec<String> {
        self.applied.iter().map(|c| c.path.clone()).collect()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Concatenated diff summary of every applied file
    pub fn diff_summary(&self) -> String {
        self.applied
            .iter()
            .map(|c| c.diff.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
