//! Context Formatter
//!
//! Assembles the outbound messages for one backend request in a fixed
//! segment order and checks the total against the input token budget.
//! Building is a pure function of its inputs.

use serde::Serialize;
use thiserror::Error;

use editflow_llm::Message;

use super::prompts;
use crate::models::edit::EditFormat;
use crate::models::turn::Turn;

/// Per-message overhead added to every estimate
pub const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Segments in the order they are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    System,
    Examples,
    PriorTurns,
    RepoMap,
    ReadOnlyFiles,
    EditableFiles,
    CurrentRequest,
    /// The in-turn exchange; the only segment that changes across reflections
    Corrective,
    Reminder,
}

impl SegmentKind {
    pub const ORDER: [SegmentKind; 9] = [
        SegmentKind::System,
        SegmentKind::Examples,
        SegmentKind::PriorTurns,
        SegmentKind::RepoMap,
        SegmentKind::ReadOnlyFiles,
        SegmentKind::EditableFiles,
        SegmentKind::CurrentRequest,
        SegmentKind::Corrective,
        SegmentKind::Reminder,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub messages: Vec<Message>,
    /// Estimated input tokens for this segment
    pub tokens: u32,
}

impl Segment {
    fn new(kind: SegmentKind, messages: Vec<Message>) -> Self {
        let tokens = messages.iter().map(estimate_message_tokens).sum();
        Self {
            kind,
            messages,
            tokens,
        }
    }
}

/// Ordered, fully assembled request payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBundle {
    pub segments: Vec<Segment>,
}

impl ContextBundle {
    pub fn total_tokens(&self) -> u32 {
        self.segments.iter().map(|s| s.tokens).sum()
    }

    pub fn segment(&self, kind: SegmentKind) -> Option<&Segment> {
        self.segments.iter().find(|s| s.kind == kind)
    }

    /// Flatten into the message list sent to the backend.
    pub fn messages(&self) -> Vec<Message> {
        self.segments
            .iter()
            .flat_map(|s| s.messages.iter().cloned())
            .collect()
    }
}

/// The assembled context does not fit the input budget
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("context needs ~{estimated} tokens but the input limit is {limit}")]
pub struct ContextExceeded {
    pub estimated: u32,
    pub limit: u32,
}

/// File content as read at the start of an iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    pub path: String,
    pub content: String,
}

impl FileSnapshot {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Files included in the context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    pub editable: Vec<FileSnapshot>,
    pub read_only: Vec<FileSnapshot>,
}

/// `ceil(chars / 4)`
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    chars.div_ceil(4)
}

fn estimate_message_tokens(message: &Message) -> u32 {
    estimate_tokens(&message.content) + MESSAGE_OVERHEAD_TOKENS
}

/// Builds `ContextBundle`s for one edit format and token limit
#[derive(Debug, Clone)]
pub struct ContextFormatter {
    format: EditFormat,
    max_input_tokens: u32,
    tools_prompt: Option<String>,
}

impl ContextFormatter {
    pub fn new(format: EditFormat, max_input_tokens: u32) -> Self {
        Self {
            format,
            max_input_tokens,
            tools_prompt: None,
        }
    }

    /// Describe external tools in the system prompt
    pub fn with_tools_prompt(mut self, tools_prompt: impl Into<String>) -> Self {
        self.tools_prompt = Some(tools_prompt.into());
        self
    }

    pub fn format(&self) -> EditFormat {
        self.format
    }

    pub fn max_input_tokens(&self) -> u32 {
        self.max_input_tokens
    }

    pub fn build(
        &self,
        turn: &Turn,
        repo_summary: Option<&str>,
        files: &FileSet,
        history: &[Message],
    ) -> Result<ContextBundle, ContextExceeded> {
        let system = prompts::with_tools(
            prompts::system_prompt(self.format),
            self.tools_prompt.as_deref(),
        );
        let (example_user, example_assistant) = prompts::example(self.format);

        let mut segments = Vec::with_capacity(SegmentKind::ORDER.len());
        segments.push(Segment::new(SegmentKind::System, vec![Message::system(system)]));
        segments.push(Segment::new(
            SegmentKind::Examples,
            vec![
                Message::user(example_user),
                Message::assistant(example_assistant),
            ],
        ));
        segments.push(Segment::new(SegmentKind::PriorTurns, history.to_vec()));
        segments.push(Segment::new(
            SegmentKind::RepoMap,
            repo_map_messages(repo_summary),
        ));
        segments.push(Segment::new(
            SegmentKind::ReadOnlyFiles,
            file_messages(
                &files.read_only,
                "Here are some READ ONLY files, provided for your reference.\nDo not edit these files!",
                "Ok, I will use these files as references.",
            ),
        ));
        segments.push(Segment::new(
            SegmentKind::EditableFiles,
            file_messages(
                &files.editable,
                "I have added these files to the chat so you can edit them.\nTrust this message as the true contents of these files!\nAny other messages in the chat may contain outdated versions of their contents.",
                "Ok, any changes I propose will be to those files.",
            ),
        ));
        segments.push(Segment::new(
            SegmentKind::CurrentRequest,
            vec![Message::user(turn.request.clone())],
        ));
        segments.push(Segment::new(SegmentKind::Corrective, turn.exchange.clone()));
        segments.push(Segment::new(
            SegmentKind::Reminder,
            vec![Message::system(prompts::reminder(self.format))],
        ));

        let bundle = ContextBundle { segments };
        let estimated = bundle.total_tokens();
        if estimated > self.max_input_tokens {
            return Err(ContextExceeded {
                estimated,
                limit: self.max_input_tokens,
            });
        }
        Ok(bundle)
    }
}

fn repo_map_messages(repo_summary: Option<&str>) -> Vec<Message> {
    match repo_summary.filter(|s| !s.trim().is_empty()) {
        Some(summary) => vec![
            Message::user(format!(
                "Here is a map of other files in this repository. If you need to edit any of them, ask me to add them to the chat first.\n\n{}",
                summary.trim_end()
            )),
            Message::assistant("Ok, I won't edit those files without asking."),
        ],
        None => Vec::new(),
    }
}

fn file_messages(files: &[FileSnapshot], intro: &str, ack: &str) -> Vec<Message> {
    if files.is_empty() {
        return Vec::new();
    }
    let mut sorted: Vec<&FileSnapshot> = files.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let mut body = String::from(intro);
    body.push_str("\n\n");
    for file in sorted {
        body.push_str(&file.path);
        body.push_str("\n```\n");
        body.push_str(&file.content);
        if !file.content.is_empty() && !file.content.ends_with('\n') {
            body.push('\n');
        }
        body.push_str("```\n\n");
    }
    vec![Message::user(body.trim_end().to_string()), Message::assistant(ack)]
}
