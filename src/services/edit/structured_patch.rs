//! Structured Patch Parser
//!
//! Strict JSON edits, optionally inside a ```json fence:
//!
//! ```json
//! {"edits": [{"path": "a.py", "op": "replace", "range": {"start": 3, "end": 4},
//!             "expected": "old\n", "content": "new\n"}]}
//! ```
//!
//! `range` is required for `replace` and is authoritative. Unknown fields
//! are rejected.

use serde::Deserialize;

use super::ParseContext;
use crate::models::edit::{EditKind, EditOperation, LineRange, MalformedEdit};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PatchDocument {
    edits: Vec<PatchRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum PatchOp {
    Replace,
    Write,
    Create,
    Delete,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PatchRecord {
    path: String,
    op: PatchOp,
    #[serde(default)]
    range: Option<LineRange>,
    #[serde(default)]
    expected: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

pub fn parse(response: &str, ctx: &ParseContext) -> Result<Vec<EditOperation>, MalformedEdit> {
    let Some(json) = extract_json(response) else {
        return Ok(Vec::new());
    };

    let document: PatchDocument = serde_json::from_str(json).map_err(|e| {
        MalformedEdit::new(format!("invalid patch JSON: {}", e)).with_fragment(json)
    })?;

    document
        .edits
        .into_iter()
        .enumerate()
        .map(|(idx, record)| to_operation(idx, record, ctx))
        .collect()
}

fn to_operation(
    idx: usize,
    record: PatchRecord,
    ctx: &ParseContext,
) -> Result<EditOperation, MalformedEdit> {
    let path = ctx.resolve_path(&record.path);
    let fail = |reason: String| {
        MalformedEdit::new(format!("edit #{}: {}", idx + 1, reason))
            .with_path(path.clone())
            .with_fragment(format!("{{\"path\": \"{}\", ...}}", record.path))
    };

    let op = match record.op {
        PatchOp::Replace => {
            let range = record
                .range
                .ok_or_else(|| fail("`replace` requires a `range`".to_string()))?;
            if !range.is_valid() {
                return Err(fail(format!(
                    "range {}..{} is invalid; lines are 1-based and end >= start",
                    range.start, range.end
                )));
            }
            EditOperation {
                path: path.clone(),
                kind: EditKind::ReplaceRange,
                anchor: record.expected,
                range: Some(range),
                range_exact: true,
                content: require_content(record.content, &fail)?,
            }
        }
        PatchOp::Write => {
            EditOperation::write(path.clone(), require_content(record.content, &fail)?)
        }
        PatchOp::Create => {
            EditOperation::create(path.clone(), require_content(record.content, &fail)?)
        }
        PatchOp::Delete => EditOperation::delete(path.clone()),
    };
    Ok(op)
}

fn require_content(
    content: Option<String>,
    fail: &impl Fn(String) -> MalformedEdit,
) -> Result<String, MalformedEdit> {
    content.ok_or_else(|| fail("missing `content`".to_string()))
}

/// Fenced ```json body, a bare object, or the outermost braces in prose.
fn extract_json(response: &str) -> Option<&str> {
    if let Some(start) = response.find("```json") {
        let body = &response[start + "```json".len()..];
        let end = body.find("```").unwrap_or(body.len());
        return Some(body[..end].trim());
    }
    let trimmed = response.trim();
    if trimmed.starts_with('{') {
        return Some(trimmed);
    }
    let start = response.find("{\"edits\"")?;
    let end = response.rfind('}')?;
    (end > start).then(|| &response[start..=end])
}
