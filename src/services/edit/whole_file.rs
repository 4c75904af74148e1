//! Whole-File Parser
//!
//! A path line followed by a fenced block carrying the complete new file
//! content. Fenced blocks not preceded by a path line (explanations, shell
//! commands) are ignored.

use super::{looks_like_path, ParseContext};
use crate::models::edit::{EditOperation, MalformedEdit};

pub fn parse(response: &str, ctx: &ParseContext) -> Result<Vec<EditOperation>, MalformedEdit> {
    let lines: Vec<&str> = response.lines().collect();
    let mut ops = Vec::new();
    let mut i = 0usize;

    while i < lines.len() {
        if !lines[i].trim_start().starts_with("```") {
            i += 1;
            continue;
        }

        let path_line = lines[..i]
            .iter()
            .rev()
            .find(|l| !l.trim().is_empty())
            .filter(|l| looks_like_path(l, ctx));
        let open = i;
        i += 1;
        let body_start = i;
        while i < lines.len() && lines[i].trim() != "```" {
            i += 1;
        }

        let Some(path_line) = path_line else {
            i += 1;
            continue;
        };
        let path = ctx.resolve_path(path_line);

        if i >= lines.len() {
            return Err(MalformedEdit::new("code block is never closed with ```")
                .with_path(path)
                .with_fragment(lines[open..].join("\n")));
        }
        if !ctx.is_editable(&path) {
            return Err(MalformedEdit::new(
                "not a file in the chat; only files added as editable can be rewritten",
            )
            .with_path(path)
            .with_fragment(path_line.trim()));
        }

        let mut content = lines[body_start..i].join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        ops.push(EditOperation::write(path, content));
        i += 1;
    }

    Ok(ops)
}
