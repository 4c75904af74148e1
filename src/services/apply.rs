//! Validation & Apply Engine
//!
//! Two phases:
//!
//! - `dry_run` simulates every operation against the current on-disk
//!   content, grouped per file in first-seen order, and records a SHA-256
//!   of each file as validated. A file with any failing operation is
//!   rejected as a whole.
//! - `commit` re-checks each hash and writes files atomically (temp file in
//!   the same directory, then rename). A failure affects only its own file;
//!   files already written stay written.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use similar::TextDiff;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::models::edit::{ApplyResult, EditKind, EditOperation, FileChange, MalformedEdit};
use crate::services::edit::matching::{find_similar_lines, head_lines, replace_anchor, MatchError};
use crate::utils::paths::normalize_relative;

/// Lines of file head quoted when no similar lines exist
const HEAD_HINT_LINES: usize = 20;

/// One file's validated change
#[derive(Debug, Clone)]
pub struct PlannedFile {
    pub path: String,
    pub kind: EditKind,
    /// Content hash at validation time; `None` when the file did not exist
    pub original_hash: Option<String>,
    original: Option<String>,
    /// `None` deletes the file
    new_content: Option<String>,
}

/// Result of a successful dry run
#[derive(Debug, Clone, Default)]
pub struct ApplyPlan {
    pub files: Vec<PlannedFile>,
    /// Files whose operations failed validation
    pub rejected: Vec<MalformedEdit>,
}

impl ApplyPlan {
    pub fn paths(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.path.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.rejected.is_empty()
    }
}

/// Applies parsed edits to a working tree rooted at `root`
#[derive(Debug, Clone)]
pub struct ApplyEngine {
    root: PathBuf,
    whitespace_flex: bool,
}

impl ApplyEngine {
    pub fn new(root: impl Into<PathBuf>, whitespace_flex: bool) -> Self {
        Self {
            root: root.into(),
            whitespace_flex,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate `ops` against current content without writing anything.
    ///
    /// Returns `Err` only when every targeted file is rejected.
    pub fn dry_run(&self, ops: &[EditOperation]) -> Result<ApplyPlan, MalformedEdit> {
        let mut groups: Vec<(String, Vec<&EditOperation>)> = Vec::new();
        for op in ops {
            match groups.iter_mut().find(|(path, _)| *path == op.path) {
                Some((_, group)) => group.push(op),
                None => groups.push((op.path.clone(), vec![op])),
            }
        }

        let mut plan = ApplyPlan::default();
        let group_count = groups.len();
        for (path, group) in groups {
            match self.plan_file(&path, &group) {
                Ok(Some(planned)) => plan.files.push(planned),
                Ok(None) => debug!(path = %path, "edits leave file unchanged"),
                Err(err) => {
                    debug!(path = %path, reason = %err.reason, "file rejected in dry run");
                    plan.rejected.push(err);
                }
            }
        }

        if group_count > 0 && plan.rejected.len() == group_count {
            if let Some(combined) = MalformedEdit::combine(std::mem::take(&mut plan.rejected)) {
                return Err(combined);
            }
        }
        Ok(plan)
    }

    /// Write every planned file. Rejected files from the plan are reported
    /// as failures alongside any write failures.
    pub fn commit(&self, plan: ApplyPlan) -> ApplyResult {
        let mut result = ApplyResult {
            applied: Vec::new(),
            failed: plan.rejected,
        };

        for file in plan.files {
            match self.commit_file(&file) {
                Ok(change) => result.applied.push(change),
                Err(err) => {
                    warn!(path = %file.path, reason = %err.reason, "file not written");
                    result.failed.push(err);
                }
            }
        }

        info!(
            applied = result.applied.len(),
            failed = result.failed.len(),
            "edits applied"
        );
        result
    }

    /// Dry run followed by commit.
    pub fn apply(&self, ops: &[EditOperation]) -> ApplyResult {
        match self.dry_run(ops) {
            Ok(plan) => self.commit(plan),
            Err(err) => ApplyResult {
                applied: Vec::new(),
                failed: err.flatten(),
            },
        }
    }

    // ========================================================================
    // Dry run
    // ========================================================================

    fn plan_file(
        &self,
        path: &str,
        ops: &[&EditOperation],
    ) -> Result<Option<PlannedFile>, MalformedEdit> {
        let rel = normalize_relative(path).ok_or_else(|| {
            MalformedEdit::new("path must be relative and stay inside the project").with_path(path)
        })?;
        let original = self.read_current(&rel)?;
        let original_hash = original.as_deref().map(|c| sha256_hex(c.as_bytes()));

        let mut state = original.clone();
        let mut kind = ops.first().map(|op| op.kind).unwrap_or(EditKind::ReplaceRange);
        for op in ops {
            state = self.simulate(&rel, state, op)?;
            kind = op.kind;
        }
        if original.is_none() && state.is_some() {
            kind = EditKind::Create;
        }

        if state == original {
            return Ok(None);
        }
        Ok(Some(PlannedFile {
            path: rel,
            kind,
            original_hash,
            original,
            new_content: state,
        }))
    }

    fn read_current(&self, rel: &str) -> Result<Option<String>, MalformedEdit> {
        let full = self.root.join(rel);
        if !full.exists() {
            return Ok(None);
        }
        if !full.is_file() {
            return Err(MalformedEdit::new("path is not a regular file").with_path(rel));
        }
        let bytes = fs::read(&full).map_err(|e| {
            MalformedEdit::new(format!("could not read file: {}", e)).with_path(rel)
        })?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| MalformedEdit::new("cannot edit a binary or non-UTF-8 file").with_path(rel))
    }

    fn simulate(
        &self,
        path: &str,
        state: Option<String>,
        op: &EditOperation,
    ) -> Result<Option<String>, MalformedEdit> {
        let fragment = op.anchor.clone().unwrap_or_default();
        match op.kind {
            EditKind::Create => Ok(Some(match state {
                None => op.content.clone(),
                Some(existing) if existing.is_empty() => op.content.clone(),
                Some(mut existing) => {
                    if !existing.ends_with('\n') {
                        existing.push('\n');
                    }
                    existing.push_str(&op.content);
                    existing
                }
            })),
            EditKind::WholeFileWrite => Ok(Some(op.content.clone())),
            EditKind::Delete => match state {
                Some(_) => Ok(None),
                None => Err(MalformedEdit::new("cannot delete a file that does not exist")
                    .with_path(path)),
            },
            EditKind::ReplaceRange => {
                let Some(current) = state else {
                    if op.anchor.as_deref().is_some_and(|a| !a.trim().is_empty()) {
                        return Err(MalformedEdit::new(
                            "file does not exist; to create it, leave the original text empty",
                        )
                        .with_path(path)
                        .with_fragment(fragment));
                    }
                    return Ok(Some(op.content.clone()));
                };
                if op.range_exact {
                    return self.replace_exact_range(path, &current, op).map(Some);
                }
                let anchor = op.anchor.as_deref().unwrap_or_default();
                if anchor.trim().is_empty() {
                    let create = EditOperation::create(path, op.content.clone());
                    return self.simulate(path, Some(current), &create);
                }
                let hint_line = op.range.map(|r| r.start);
                replace_anchor(&current, anchor, &op.content, hint_line, self.whitespace_flex)
                    .map(Some)
                    .map_err(|err| match err {
                        MatchError::NotFound => MalformedEdit::new(
                            "the original text does not match the current file content",
                        )
                        .with_path(path)
                        .with_fragment(anchor)
                        .with_hint(not_found_hint(path, anchor, &current)),
                        MatchError::Ambiguous(_) => MalformedEdit::new(err.to_string())
                            .with_path(path)
                            .with_fragment(anchor),
                    })
            }
        }
    }

    fn replace_exact_range(
        &self,
        path: &str,
        current: &str,
        op: &EditOperation,
    ) -> Result<String, MalformedEdit> {
        let Some(range) = op.range.filter(|r| r.is_valid() || r.is_insertion()) else {
            return Err(MalformedEdit::new("a valid 1-based line range is required").with_path(path));
        };
        let lines: Vec<&str> = current.split_inclusive('\n').collect();
        if range.end > lines.len() {
            return Err(MalformedEdit::new(format!(
                "lines {}..{} are outside the file, which has {} lines",
                range.start,
                range.end,
                lines.len()
            ))
            .with_path(path)
            .with_hint(format!(
                "The current content of {} starts with:\n\n```\n{}\n```",
                path,
                head_lines(current, HEAD_HINT_LINES)
            )));
        }

        let span = &lines[range.start - 1..range.end];
        if let Some(expected) = op.anchor.as_deref() {
            if !span_matches(span, expected, self.whitespace_flex) {
                let actual: String = span.concat();
                return Err(MalformedEdit::new(format!(
                    "lines {}..{} do not contain the expected text",
                    range.start, range.end
                ))
                .with_path(path)
                .with_fragment(expected)
                .with_hint(format!(
                    "Lines {}..{} of {} currently read:\n\n```\n{}\n```",
                    range.start,
                    range.end,
                    path,
                    actual.trim_end_matches('\n')
                )));
            }
        }

        let mut out: String = lines[..range.start - 1].concat();
        if span.is_empty() && !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&op.content);
        let last_had_eol = span.last().is_some_and(|l| l.ends_with('\n'));
        if last_had_eol && !op.content.is_empty() && !op.content.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&lines[range.end..].concat());
        Ok(out)
    }

    // ========================================================================
    // Commit
    // ========================================================================

    fn commit_file(&self, file: &PlannedFile) -> Result<FileChange, MalformedEdit> {
        let full = self.root.join(&file.path);
        let current_hash = match fs::read(&full) {
            Ok(bytes) => Some(sha256_hex(&bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(
                    MalformedEdit::new(format!("could not re-read file: {}", e)).with_path(&file.path)
                )
            }
        };
        if current_hash != file.original_hash {
            return Err(MalformedEdit::new(
                "file changed on disk after the edit was validated; re-read it and send the edit again",
            )
            .with_path(&file.path));
        }

        match &file.new_content {
            Some(content) => write_atomic(&full, content),
            None => fs::remove_file(&full),
        }
        .map_err(|e| MalformedEdit::new(format!("could not write file: {}", e)).with_path(&file.path))?;

        debug!(path = %file.path, kind = %file.kind, "file written");
        Ok(FileChange {
            path: file.path.clone(),
            kind: file.kind,
            diff: unified_diff(
                &file.path,
                file.original.as_deref().unwrap_or_default(),
                file.new_content.as_deref().unwrap_or_default(),
            ),
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Write through a temp file in the same directory, then rename over `path`.
fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;

    if let Ok(meta) = fs::metadata(path) {
        tmp.as_file().set_permissions(meta.permissions())?;
    } else {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o644))?;
        }
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn unified_diff(path: &str, old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{}", path), &format!("b/{}", path))
        .to_string()
}

fn span_matches(span: &[&str], expected: &str, whitespace_flex: bool) -> bool {
    let actual: Vec<&str> = span.iter().map(|l| l.trim_end_matches(['\n', '\r'])).collect();
    let wanted: Vec<&str> = expected.lines().collect();
    if actual.len() != wanted.len() {
        return false;
    }
    actual.iter().zip(&wanted).all(|(a, w)| {
        if whitespace_flex {
            a.trim_end() == w.trim_end()
        } else {
            a == w
        }
    })
}

fn not_found_hint(path: &str, anchor: &str, current: &str) -> String {
    match find_similar_lines(anchor, current) {
        Some(similar) => format!(
            "Did you mean to match some of these actual lines from {}?\n\n```\n{}\n```",
            path, similar
        ),
        None => format!(
            "The current content of {} starts with:\n\n```\n{}\n```",
            path,
            head_lines(current, HEAD_HINT_LINES)
        ),
    }
}
