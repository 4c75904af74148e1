//! Anchor Matching
//!
//! Locates an anchor fragment in current file content and splices in the
//! replacement. Passes run in order until one finds a match:
//!
//! 1. exact substring
//! 2. uniform leading-indentation difference (replacement is re-indented)
//! 3. trailing-whitespace difference
//!
//! Passes 2 and 3 only run with whitespace flexibility enabled. Several
//! matches are resolved by a 1-based line hint when one is given.

use similar::TextDiff;

/// Minimum similarity for a "did you mean" suggestion
const SIMILARITY_THRESHOLD: f32 = 0.6;

/// Context lines shown around a near match
const HINT_CONTEXT_LINES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchError {
    NotFound,
    /// The anchor matches this many places and no hint picked one
    Ambiguous(usize),
}

impl std::fmt::Display for MatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "text not found in the current file content"),
            Self::Ambiguous(n) => write!(
                f,
                "text appears {} times in the file; include more surrounding lines to make it unique",
                n
            ),
        }
    }
}

/// Replace the single occurrence of `anchor` in `content` with `replacement`.
pub fn replace_anchor(
    content: &str,
    anchor: &str,
    replacement: &str,
    hint_line: Option<usize>,
    whitespace_flex: bool,
) -> Result<String, MatchError> {
    if anchor.is_empty() {
        return Err(MatchError::NotFound);
    }

    let exact: Vec<(usize, usize)> = content
        .match_indices(anchor)
        .map(|(idx, _)| (line_of_offset(content, idx), idx))
        .collect();
    if !exact.is_empty() {
        let idx = pick(exact, hint_line)?;
        let mut out = String::with_capacity(content.len() + replacement.len());
        out.push_str(&content[..idx]);
        out.push_str(replacement);
        out.push_str(&content[idx + anchor.len()..]);
        return Ok(out);
    }

    if !whitespace_flex || anchor.trim().is_empty() {
        return Err(MatchError::NotFound);
    }

    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let anchor_lines: Vec<&str> = anchor.lines().collect();
    let replacement_lines: Vec<&str> = replacement.lines().collect();

    match replace_reindented(&lines, &anchor_lines, &replacement_lines, hint_line) {
        Err(MatchError::NotFound) => {}
        other => return other,
    }
    replace_trailing_flex(&lines, &anchor_lines, &replacement_lines, hint_line)
}

/// Quote the lines of `content` most similar to `anchor`, if any are close.
pub fn find_similar_lines(anchor: &str, content: &str) -> Option<String> {
    let anchor_lines: Vec<&str> = anchor.lines().collect();
    let content_lines: Vec<&str> = content.lines().collect();
    if anchor_lines.is_empty() || content_lines.is_empty() {
        return None;
    }

    let window = anchor_lines.len().min(content_lines.len());
    let anchor_text = anchor_lines.join("\n");
    let mut best_ratio = 0.0f32;
    let mut best_start = 0usize;
    for start in 0..=(content_lines.len() - window) {
        let candidate = content_lines[start..start + window].join("\n");
        let ratio = TextDiff::from_chars(anchor_text.as_str(), candidate.as_str()).ratio();
        if ratio > best_ratio {
            best_ratio = ratio;
            best_start = start;
        }
    }

    if best_ratio < SIMILARITY_THRESHOLD {
        return None;
    }

    let best = &content_lines[best_start..best_start + window];
    if best.first() == anchor_lines.first() && best.last() == anchor_lines.last() {
        return Some(best.join("\n"));
    }
    let from = best_start.saturating_sub(HINT_CONTEXT_LINES);
    let to = (best_start + window + HINT_CONTEXT_LINES).min(content_lines.len());
    Some(content_lines[from..to].join("\n"))
}

/// First `limit` lines of `content`.
pub fn head_lines(content: &str, limit: usize) -> String {
    content.lines().take(limit).collect::<Vec<_>>().join("\n")
}

// ============================================================================
// Line-based passes
// ============================================================================

fn replace_reindented(
    lines: &[&str],
    anchor: &[&str],
    replacement: &[&str],
    hint_line: Option<usize>,
) -> Result<String, MatchError> {
    let strip = min_indent(anchor.iter().chain(replacement.iter()).copied());
    let anchor: Vec<&str> = anchor.iter().map(|l| dedent(l, strip)).collect();
    let replacement: Vec<&str> = replacement.iter().map(|l| dedent(l, strip)).collect();

    let Some(first) = anchor.iter().position(|l| !l.trim().is_empty()) else {
        return Err(MatchError::NotFound);
    };
    if anchor.len() > lines.len() {
        return Err(MatchError::NotFound);
    }

    let mut candidates: Vec<(usize, (usize, String))> = Vec::new();
    for start in 0..=(lines.len() - anchor.len()) {
        let probe = strip_eol(lines[start + first]);
        let Some(prefix) = probe.strip_suffix(anchor[first]) else {
            continue;
        };
        if !prefix.chars().all(char::is_whitespace) {
            continue;
        }
        let all_match = anchor.iter().enumerate().all(|(k, a)| {
            let line = strip_eol(lines[start + k]);
            if a.trim().is_empty() {
                line.trim().is_empty()
            } else {
                line.len() == prefix.len() + a.len()
                    && line.starts_with(prefix)
                    && line.ends_with(a)
            }
        });
        if all_match {
            candidates.push((start + 1, (start, prefix.to_string())));
        }
    }

    if candidates.is_empty() {
        return Err(MatchError::NotFound);
    }
    let (start, prefix) = pick(candidates, hint_line)?;
    let reindented: Vec<String> = replacement
        .iter()
        .map(|l| {
            if l.trim().is_empty() {
                String::new()
            } else {
                format!("{}{}", prefix, l)
            }
        })
        .collect();
    Ok(splice_lines(lines, start, anchor.len(), &reindented))
}

fn replace_trailing_flex(
    lines: &[&str],
    anchor: &[&str],
    replacement: &[&str],
    hint_line: Option<usize>,
) -> Result<String, MatchError> {
    if anchor.len() > lines.len() {
        return Err(MatchError::NotFound);
    }
    let candidates: Vec<(usize, usize)> = (0..=(lines.len() - anchor.len()))
        .filter(|&start| {
            anchor
                .iter()
                .enumerate()
                .all(|(k, a)| strip_eol(lines[start + k]).trim_end() == a.trim_end())
        })
        .map(|start| (start + 1, start))
        .collect();

    if candidates.is_empty() {
        return Err(MatchError::NotFound);
    }
    let start = pick(candidates, hint_line)?;
    let replacement: Vec<String> = replacement.iter().map(|l| l.to_string()).collect();
    Ok(splice_lines(lines, start, anchor.len(), &replacement))
}

/// Choose the unique candidate, or the one nearest the hint line.
fn pick<T>(mut candidates: Vec<(usize, T)>, hint_line: Option<usize>) -> Result<T, MatchError> {
    match (candidates.len(), hint_line) {
        (0, _) => Err(MatchError::NotFound),
        (1, _) => Ok(candidates.remove(0).1),
        (n, None) => Err(MatchError::Ambiguous(n)),
        (_, Some(hint)) => {
            let best = candidates
                .iter()
                .enumerate()
                .min_by_key(|(_, (line, _))| line.abs_diff(hint))
                .map(|(idx, _)| idx)
                .unwrap_or(0);
            Ok(candidates.swap_remove(best).1)
        }
    }
}

fn splice_lines(lines: &[&str], start: usize, len: usize, replacement: &[String]) -> String {
    let eol = if lines[start].ends_with("\r\n") {
        "\r\n"
    } else {
        "\n"
    };
    let last_had_eol = lines[start + len - 1].ends_with('\n');

    let mut out = String::new();
    for line in &lines[..start] {
        out.push_str(line);
    }
    for (idx, line) in replacement.iter().enumerate() {
        out.push_str(line);
        if idx + 1 < replacement.len() || last_had_eol {
            out.push_str(eol);
        }
    }
    for line in &lines[start + len..] {
        out.push_str(line);
    }
    out
}

fn line_of_offset(content: &str, offset: usize) -> usize {
    content[..offset].matches('\n').count() + 1
}

fn strip_eol(line: &str) -> &str {
    line.strip_suffix("\r\n")
        .or_else(|| line.strip_suffix('\n'))
        .unwrap_or(line)
}

fn min_indent<'a>(lines: impl Iterator<Item = &'a str>) -> usize {
    lines
        .filter(|l| !l.trim().is_empty())
        .map(indent_width)
        .min()
        .unwrap_or(0)
}

/// Leading spaces and tabs only; both are single bytes.
fn indent_width(line: &str) -> usize {
    line.bytes().take_while(|b| *b == b' ' || *b == b'\t').count()
}

fn dedent(line: &str, width: usize) -> &str {
    &line[width.min(indent_width(line))..]
}
