//! Unified Diff Parser
//!
//! Reads `--- a/path` / `+++ b/path` headers followed by `@@` hunks. Hunk
//! line numbers are optional and only become an advisory hint; the apply
//! engine matches each hunk by content (context plus removed lines). A hunk
//! with nothing to match is placed by its line number when it has one.

use std::sync::OnceLock;

use regex::Regex;

use super::ParseContext;
use crate::models::edit::{EditKind, EditOperation, LineRange, MalformedEdit};

fn hunk_header() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^@@\s*(?:-(\d+)(?:,\d+)?)?\s*(?:\+\d+(?:,\d+)?)?\s*@@")
            .expect("hunk header pattern is valid")
    })
}

#[derive(Debug, Default)]
struct Hunk {
    old_start: Option<usize>,
    before: Vec<String>,
    after: Vec<String>,
    header: String,
}

impl Hunk {
    fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }

    fn fragment(&self) -> String {
        let mut out = self.header.clone();
        out.push('\n');
        for line in &self.before {
            out.push('-');
            out.push_str(line);
            out.push('\n');
        }
        for line in &self.after {
            out.push('+');
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

/// Target of the current `---`/`+++` pair. `None` paths are `/dev/null`.
#[derive(Debug)]
struct FileHeader {
    source: Option<String>,
    target: Option<String>,
}

pub fn parse(response: &str, ctx: &ParseContext) -> Result<Vec<EditOperation>, MalformedEdit> {
    let lines: Vec<&str> = response.lines().collect();
    let mut ops = Vec::new();
    let mut header: Option<FileHeader> = None;
    let mut hunk: Option<Hunk> = None;
    let mut i = 0usize;

    while i < lines.len() {
        let line = lines[i];

        if line.starts_with("--- ") && lines.get(i + 1).is_some_and(|l| l.starts_with("+++ ")) {
            flush(&mut hunk, header.as_ref(), &mut ops)?;
            let source = header_path(&line[4..], ctx);
            let target = header_path(&lines[i + 1][4..], ctx);
            if source.is_none() && target.is_none() {
                return Err(MalformedEdit::new("both diff headers are /dev/null")
                    .with_fragment(format!("{}\n{}", line, lines[i + 1])));
            }
            if let (Some(path), None) = (&source, &target) {
                ops.push(EditOperation::delete(path.clone()));
            }
            header = Some(FileHeader { source, target });
            i += 2;
            continue;
        }

        if line.starts_with("@@") {
            flush(&mut hunk, header.as_ref(), &mut ops)?;
            if header.is_none() {
                return Err(MalformedEdit::new(
                    "hunk has no `--- a/path` / `+++ b/path` header before it",
                )
                .with_fragment(line));
            }
            let old_start = hunk_header()
                .captures(line)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<usize>().ok());
            hunk = Some(Hunk {
                old_start,
                header: line.to_string(),
                ..Hunk::default()
            });
            i += 1;
            continue;
        }

        let in_file = header.is_some();
        let is_body = line.is_empty()
            || line.starts_with(' ')
            || line.starts_with('-')
            || line.starts_with('+')
            || line.starts_with('\\');
        if in_file && is_body && !line.starts_with("```") {
            let current = hunk.get_or_insert_with(|| Hunk {
                header: "@@ @@".to_string(),
                ..Hunk::default()
            });
            if let Some(rest) = line.strip_prefix('-') {
                current.before.push(rest.to_string());
            } else if let Some(rest) = line.strip_prefix('+') {
                current.after.push(rest.to_string());
            } else if line.starts_with('\\') {
                // "\ No newline at end of file"
            } else {
                let rest = line.strip_prefix(' ').unwrap_or(line);
                current.before.push(rest.to_string());
                current.after.push(rest.to_string());
            }
        } else {
            flush(&mut hunk, header.as_ref(), &mut ops)?;
            if !line.starts_with("```") {
                header = None;
            }
        }
        i += 1;
    }
    flush(&mut hunk, header.as_ref(), &mut ops)?;

    Ok(ops)
}

fn flush(
    hunk: &mut Option<Hunk>,
    header: Option<&FileHeader>,
    ops: &mut Vec<EditOperation>,
) -> Result<(), MalformedEdit> {
    let Some(mut hunk) = hunk.take() else {
        return Ok(());
    };
    trim_trailing_blank_context(&mut hunk);
    if hunk.is_empty() {
        return Ok(());
    }
    let Some(header) = header else {
        return Err(MalformedEdit::new("hunk has no file header").with_fragment(hunk.fragment()));
    };

    match (&header.source, &header.target) {
        (_, None) => Ok(()),
        (None, Some(target)) => {
            let content = join_lines(&hunk.after);
            match ops.last_mut() {
                Some(last) if last.path == *target && last.kind == EditKind::Create => {
                    last.content.push_str(&content);
                }
                _ => ops.push(EditOperation::create(target.clone(), content)),
            }
            Ok(())
        }
        (Some(_), Some(target)) => {
            // No content to anchor on: the header's line number places it
            if hunk.before.is_empty() {
                let content = join_lines(&hunk.after);
                ops.push(match hunk.old_start {
                    Some(after) => EditOperation::insert_after(target.clone(), after, content),
                    None => EditOperation::create(target.clone(), content),
                });
                return Ok(());
            }
            if hunk.before.iter().all(|l| l.trim().is_empty()) {
                let op = match hunk.old_start.filter(|s| *s > 0) {
                    Some(start) => EditOperation::replace(
                        target.clone(),
                        join_lines(&hunk.before),
                        join_lines(&hunk.after),
                    )
                    .with_exact_range(LineRange::new(start, start + hunk.before.len() - 1)),
                    None => EditOperation::create(target.clone(), join_lines(&hunk.after)),
                };
                ops.push(op);
                return Ok(());
            }
            let mut op = EditOperation::replace(
                target.clone(),
                join_lines(&hunk.before),
                join_lines(&hunk.after),
            );
            if let Some(start) = hunk.old_start.filter(|s| *s > 0) {
                op = op.with_range(LineRange::new(start, start + hunk.before.len() - 1));
            }
            ops.push(op);
            Ok(())
        }
    }
}

/// Blank lines between a hunk and following prose are not context.
fn trim_trailing_blank_context(hunk: &mut Hunk) {
    while hunk.before.last().is_some_and(|l| l.is_empty())
        && hunk.after.last().is_some_and(|l| l.is_empty())
    {
        hunk.before.pop();
        hunk.after.pop();
    }
}

fn header_path(raw: &str, ctx: &ParseContext) -> Option<String> {
    let path = raw.split('\t').next().unwrap_or(raw).trim();
    if path == "/dev/null" {
        return None;
    }
    let path = path
        .strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path);
    Some(ctx.resolve_path(path))
}

fn join_lines(lines: &[String]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}
