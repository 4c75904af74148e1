//! Search/Replace Block Parser
//!
//! ```text
//! path/to/file.py
//! <<<<<<< SEARCH
//! original lines
//! =======
//! updated lines
//! >>>>>>> REPLACE
//! ```
//!
//! The path line may sit outside a code fence wrapping the block. A block
//! with no path line reuses the previous block's path. An empty SEARCH
//! section creates the file (or appends to it).

use std::sync::OnceLock;

use regex::Regex;

use super::{looks_like_path, ParseContext};
use crate::models::edit::{EditOperation, MalformedEdit};

/// Lines before a SEARCH marker scanned for the path
const PATH_LOOKBACK: usize = 3;

struct Markers {
    head: Regex,
    divider: Regex,
    updated: Regex,
}

fn markers() -> &'static Markers {
    static MARKERS: OnceLock<Markers> = OnceLock::new();
    MARKERS.get_or_init(|| Markers {
        head: Regex::new(r"^<{5,9} SEARCH>?\s*$").expect("search marker pattern is valid"),
        divider: Regex::new(r"^={5,9}\s*$").expect("divider marker pattern is valid"),
        updated: Regex::new(r"^>{5,9} REPLACE\s*$").expect("replace marker pattern is valid"),
    })
}

pub fn parse(response: &str, ctx: &ParseContext) -> Result<Vec<EditOperation>, MalformedEdit> {
    let m = markers();
    let lines: Vec<&str> = response.lines().collect();
    let mut ops = Vec::new();
    let mut current_path: Option<String> = None;
    let mut block_no = 0usize;
    let mut i = 0usize;

    while i < lines.len() {
        if !m.head.is_match(lines[i].trim_end()) {
            i += 1;
            continue;
        }
        block_no += 1;

        let path = match find_path(&lines[..i], ctx) {
            Some(path) => path,
            None => current_path.clone().ok_or_else(|| {
                MalformedEdit::new(format!(
                    "block {} has no file path; put the full path alone on the line before the block",
                    block_no
                ))
                .with_fragment(lines[i])
            })?,
        };
        current_path = Some(path.clone());
        i += 1;

        let original_start = i;
        while i < lines.len() && !m.divider.is_match(lines[i].trim_end()) {
            if m.head.is_match(lines[i].trim_end()) || m.updated.is_match(lines[i].trim_end()) {
                break;
            }
            i += 1;
        }
        if i >= lines.len() || !m.divider.is_match(lines[i].trim_end()) {
            return Err(MalformedEdit::new(format!(
                "block {} is missing the `=======` divider",
                block_no
            ))
            .with_path(path)
            .with_fragment(render_block(&lines[original_start..i.min(lines.len())], &[])));
        }
        let original = &lines[original_start..i];
        i += 1;

        let updated_start = i;
        while i < lines.len() && !m.updated.is_match(lines[i].trim_end()) {
            if m.head.is_match(lines[i].trim_end()) {
                break;
            }
            i += 1;
        }
        if i >= lines.len() || !m.updated.is_match(lines[i].trim_end()) {
            return Err(MalformedEdit::new(format!(
                "block {} is missing the `>>>>>>> REPLACE` terminator",
                block_no
            ))
            .with_path(path)
            .with_fragment(render_block(original, &lines[updated_start..i.min(lines.len())])));
        }
        let updated = &lines[updated_start..i];
        i += 1;

        let updated_text = join_lines(updated);
        if original.iter().all(|l| l.trim().is_empty()) {
            ops.push(EditOperation::create(path, updated_text));
        } else {
            ops.push(EditOperation::replace(path, join_lines(original), updated_text));
        }
    }

    Ok(ops)
}

/// Walk back over fence lines to find the block's path line.
fn find_path(before: &[&str], ctx: &ParseContext) -> Option<String> {
    for line in before.iter().rev().take(PATH_LOOKBACK) {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            continue;
        }
        if looks_like_path(trimmed, ctx) {
            return Some(ctx.resolve_path(trimmed));
        }
        return None;
    }
    None
}

fn join_lines(lines: &[&str]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

fn render_block(original: &[&str], updated: &[&str]) -> String {
    let mut out = String::from("<<<<<<< SEARCH\n");
    out.push_str(&join_lines(original));
    if !updated.is_empty() {
        out.push_str("=======\n");
        out.push_str(&join_lines(updated));
    }
    out
}
