//! Edit Parsers
//!
//! Pure translators from model response text to `EditOperation`s, one per
//! `EditFormat`. Parsers never touch the filesystem; anchors are verified by
//! the apply engine against current content.

pub mod matching;
pub mod search_replace;
pub mod structured_patch;
pub mod unified_diff;
pub mod whole_file;

use crate::models::edit::{EditFormat, EditOperation, MalformedEdit};
use crate::utils::paths::normalize_relative;

/// Editable file list used to resolve the paths a model writes
#[derive(Debug, Clone, Default)]
pub struct ParseContext {
    editable: Vec<String>,
}

impl ParseContext {
    pub fn new<I, S>(editable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            editable: editable.into_iter().map(Into::into).collect(),
        }
    }

    pub fn editable(&self) -> &[String] {
        &self.editable
    }

    pub fn is_editable(&self, path: &str) -> bool {
        self.editable.iter().any(|p| p == path)
    }

    /// Exact editable path, else a unique basename match, else the cleaned
    /// path as written.
    pub fn resolve_path(&self, raw: &str) -> String {
        let cleaned = clean_path(raw);
        if self.is_editable(&cleaned) {
            return cleaned;
        }
        let base = basename(&cleaned);
        let mut matches = self.editable.iter().filter(|p| basename(p) == base);
        match (matches.next(), matches.next()) {
            (Some(only), None) => only.clone(),
            _ => cleaned,
        }
    }
}

impl EditFormat {
    /// Parse a complete response. An empty list means the response made no edits.
    pub fn parse(
        &self,
        response: &str,
        ctx: &ParseContext,
    ) -> Result<Vec<EditOperation>, MalformedEdit> {
        match self {
            EditFormat::SearchReplace => search_replace::parse(response, ctx),
            EditFormat::UnifiedDiff => unified_diff::parse(response, ctx),
            EditFormat::WholeFile => whole_file::parse(response, ctx),
            EditFormat::StructuredPatch => structured_patch::parse(response, ctx),
        }
    }
}

/// Shell commands the model asked to run, one per fenced bash/sh/shell block.
pub fn extract_shell_commands(response: &str) -> Vec<String> {
    let mut commands = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in response.lines() {
        let trimmed = line.trim();
        match current.as_mut() {
            None => {
                if let Some(lang) = trimmed.strip_prefix("```") {
                    if matches!(lang.trim(), "bash" | "sh" | "shell" | "console") {
                        current = Some(Vec::new());
                    }
                }
            }
            Some(body) => {
                if trimmed.starts_with("```") {
                    let command = body.join("\n").trim().to_string();
                    if !command.is_empty() {
                        commands.push(command);
                    }
                    current = None;
                } else {
                    body.push(line.strip_prefix("$ ").unwrap_or(line));
                }
            }
        }
    }
    commands
}

/// Strip decoration a model commonly puts around a filename.
pub(crate) fn clean_path(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_end_matches(':')
        .trim_start_matches('#')
        .trim()
        .trim_matches(|c| c == '`' || c == '*' || c == '"' || c == '\'')
        .trim();
    normalize_relative(trimmed).unwrap_or_else(|| trimmed.to_string())
}

/// Whether a line plausibly names a file rather than being prose.
pub(crate) fn looks_like_path(candidate: &str, ctx: &ParseContext) -> bool {
    if candidate.trim_start().starts_with("```") {
        return false;
    }
    let cleaned = clean_path(candidate);
    if cleaned.is_empty() || cleaned == "..." {
        return false;
    }
    if ctx.is_editable(&cleaned) || ctx.resolve_path(&cleaned) != cleaned {
        return true;
    }
    !cleaned.contains(char::is_whitespace) && (cleaned.contains('.') || cleaned.contains('/'))
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
