//! Reflection Coordinator
//!
//! Runs one turn: format the context, call the model, parse and apply the
//! edits, run the quality gates, and feed any correctable failure back to
//! the model until the turn succeeds or a limit is reached.
//!
//! Each state's work happens here; `state::next` decides where to go.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use editflow_core::UnifiedStreamEvent;
use editflow_llm::{Message, ModelBackend, ToolCall, UsageStats};
use editflow_quality_gates::{GatePipeline, PipelineInput};
use editflow_tools::McpToolBridge;

use super::signal::ReflectionSignal;
use super::state::{next, TurnEvent, TurnState};
use crate::models::edit::{ApplyResult, EditFormat, EditKind, EditOperation, MalformedEdit};
use crate::models::settings::AppConfig;
use crate::models::turn::{Turn, TurnOutcome, TurnResult};
use crate::services::apply::ApplyEngine;
use crate::services::context::{
    ContextBundle, ContextFormatter, FileSet, FileSnapshot, HistorySummarizer,
    SlidingWindowSummarizer,
};
use crate::services::edit::{extract_shell_commands, ParseContext};
use crate::services::gateway::{Completion, DisplaySink, ModelError, ModelGateway, RetryPolicy};
use crate::services::repo_map::RepoMap;

/// Turn-level settings
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub format: EditFormat,
    pub max_reflections: u32,
    pub stream: bool,
    /// Falls back to the backend's context window
    pub max_input_tokens: Option<u32>,
    pub max_tool_rounds: u32,
    pub whitespace_flex: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for CoordinatorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            format: config.edit_format,
            max_reflections: config.max_reflections,
            stream: config.stream,
            max_input_tokens: config.max_input_tokens,
            max_tool_rounds: config.mcp.max_tool_rounds,
            whitespace_flex: config.whitespace_flex,
        }
    }
}

pub struct ReflectionCoordinator {
    config: CoordinatorConfig,
    gateway: ModelGateway,
    engine: ApplyEngine,
    gates: Option<GatePipeline>,
    repo_map: Option<Arc<dyn RepoMap>>,
    tools: Option<McpToolBridge>,
    summarizer: Arc<dyn HistorySummarizer>,
    display: Option<DisplaySink>,
    editable: Vec<String>,
    read_only: Vec<String>,
    /// Prior turns: request and final reply pairs
    history: Vec<Message>,
}

/// Per-turn scratch state carried between states
#[derive(Default)]
struct TurnProgress {
    bundle: Option<ContextBundle>,
    completion: Option<Completion>,
    ops: Vec<EditOperation>,
    shell_commands: Vec<String>,
    signal: Option<ReflectionSignal>,
    files_changed: Vec<String>,
    /// Applied but not yet committed
    pending_commit: Vec<String>,
    commit_id: Option<String>,
    residual_errors: Vec<String>,
    /// Shell output kept for the history once the turn ends
    carried: Vec<Message>,
    usage: UsageStats,
}

impl ReflectionCoordinator {
    pub fn new(
        root: impl Into<PathBuf>,
        backend: Arc<dyn ModelBackend>,
        config: CoordinatorConfig,
    ) -> Self {
        let engine = ApplyEngine::new(root, config.whitespace_flex);
        Self {
            config,
            gateway: ModelGateway::new(backend),
            engine,
            gates: None,
            repo_map: None,
            tools: None,
            summarizer: Arc::new(SlidingWindowSummarizer::default()),
            display: None,
            editable: Vec::new(),
            read_only: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.gateway = self.gateway.with_retry(retry);
        self
    }

    pub fn with_gates(mut self, gates: GatePipeline) -> Self {
        self.gates = Some(gates);
        self
    }

    pub fn with_repo_map(mut self, repo_map: Arc<dyn RepoMap>) -> Self {
        self.repo_map = Some(repo_map);
        self
    }

    pub fn with_tools(mut self, tools: McpToolBridge) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn HistorySummarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Receive streamed model output and turn progress events
    pub fn with_display(mut self, display: DisplaySink) -> Self {
        self.gateway = self.gateway.with_display(display.clone());
        self.display = Some(display);
        self
    }

    pub fn root(&self) -> &Path {
        self.engine.root()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn add_editable(&mut self, path: impl Into<String>) {
        let path = path.into();
        self.read_only.retain(|p| *p != path);
        if !self.editable.contains(&path) {
            self.editable.push(path);
        }
    }

    pub fn add_read_only(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.editable.contains(&path) && !self.read_only.contains(&path) {
            self.read_only.push(path);
        }
    }

    pub fn editable(&self) -> &[String] {
        &self.editable
    }

    pub fn read_only(&self) -> &[String] {
        &self.read_only
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    // ========================================================================
    // Turn loop
    // ========================================================================

    pub async fn run_turn(&mut self, request: &str, cancel: &CancellationToken) -> TurnResult {
        info!(format = %self.config.format, "turn started");
        let mut turn = Turn::new(request);
        let mut progress = TurnProgress::default();
        let formatter = self.prepare_formatter().await;

        let mut state = TurnState::Idle;
        let mut event = TurnEvent::Start;
        loop {
            let from_reflecting = state == TurnState::Reflecting;
            state = match next(&state, &event) {
                Ok(to) => to,
                Err(e) => {
                    warn!(error = %e, "invalid turn transition");
                    TurnState::Done(TurnOutcome::Fatal {
                        message: e.to_string(),
                    })
                }
            };
            debug!(state = state.as_str(), "turn state");
            self.emit(UnifiedStreamEvent::TurnState {
                state: state.as_str().to_string(),
            });

            if from_reflecting && state == TurnState::Formatting {
                if let Some(signal) = progress.signal.take() {
                    turn.reflection_count += 1;
                    info!(
                        kind = signal.kind.as_str(),
                        count = turn.reflection_count,
                        "reflecting"
                    );
                    self.emit(UnifiedStreamEvent::ReflectionTriggered {
                        kind: signal.kind.as_str().to_string(),
                        count: turn.reflection_count,
                    });
                    turn.exchange.push(Message::user(signal.message));
                }
            }

            event = match &state {
                TurnState::Done(_) => break,
                TurnState::Idle => TurnEvent::Start,
                TurnState::Formatting => self.format(&formatter, &mut turn, &mut progress, cancel).await,
                TurnState::Requesting => self.request(&mut turn, &mut progress, cancel).await,
                TurnState::Extracting => self.extract(&mut turn, &mut progress, cancel).await,
                TurnState::Applying => self.apply(&mut progress, cancel),
                TurnState::Gating => self.gate(&turn, &mut progress, cancel).await,
                TurnState::Reflecting => TurnEvent::Reflect {
                    count: turn.reflection_count,
                    ceiling: self.config.max_reflections,
                },
            };
        }

        let outcome = match state {
            TurnState::Done(outcome) => outcome,
            _ => TurnOutcome::Interrupted,
        };
        self.finish(&turn, &mut progress);
        info!(
            outcome = %outcome,
            reflections = turn.reflection_count,
            files = progress.files_changed.len(),
            "turn finished"
        );

        TurnResult {
            files_changed: progress.files_changed,
            commit_id: progress.commit_id,
            residual_errors: progress.residual_errors,
            reflection_count: turn.reflection_count,
            outcome,
            usage: progress.usage,
        }
    }

    async fn prepare_formatter(&mut self) -> ContextFormatter {
        let limit = self
            .config
            .max_input_tokens
            .unwrap_or_else(|| self.gateway.context_window());
        let mut formatter = ContextFormatter::new(self.config.format, limit);

        let Some(bridge) = &self.tools else {
            return formatter;
        };
        match bridge.tool_definitions().await {
            Ok(definitions) => self.gateway.set_tools(definitions),
            Err(e) => warn!(error = %e, "tool definitions unavailable"),
        }
        match bridge.tools_prompt().await {
            Ok(Some(prompt)) => formatter = formatter.with_tools_prompt(prompt),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "tool descriptions unavailable"),
        }
        formatter
    }

    // ========================================================================
    // States
    // ========================================================================

    async fn format(
        &mut self,
        formatter: &ContextFormatter,
        turn: &mut Turn,
        progress: &mut TurnProgress,
        cancel: &CancellationToken,
    ) -> TurnEvent {
        if cancel.is_cancelled() {
            return TurnEvent::Interrupted;
        }
        let files = self.read_files();
        let repo_summary = self.repo_map.as_ref().map(|map| {
            let chat: Vec<String> = self
                .editable
                .iter()
                .chain(self.read_only.iter())
                .cloned()
                .collect();
            map.summarize(&chat)
        });

        match formatter.build(turn, repo_summary.as_deref(), &files, &self.history) {
            Ok(bundle) => {
                debug!(tokens = bundle.total_tokens(), "context formatted");
                progress.bundle = Some(bundle);
                TurnEvent::Formatted
            }
            Err(e) => self.overflow(turn, e.to_string()).await,
        }
    }

    async fn request(
        &mut self,
        turn: &mut Turn,
        progress: &mut TurnProgress,
        cancel: &CancellationToken,
    ) -> TurnEvent {
        let Some(bundle) = progress.bundle.take() else {
            return TurnEvent::RequestFailed {
                message: "no context to send".to_string(),
            };
        };
        match self.gateway.send(&bundle, self.config.stream, cancel).await {
            Ok(completion) => {
                progress.usage.add(&completion.usage);
                progress.completion = Some(completion);
                TurnEvent::Completed
            }
            Err(ModelError::Interrupted) => TurnEvent::Interrupted,
            Err(ModelError::ContextExceeded { message }) => self.overflow(turn, message).await,
            Err(e) => TurnEvent::RequestFailed {
                message: e.to_string(),
            },
        }
    }

    async fn extract(
        &mut self,
        turn: &mut Turn,
        progress: &mut TurnProgress,
        cancel: &CancellationToken,
    ) -> TurnEvent {
        let Some(completion) = progress.completion.take() else {
            return TurnEvent::NoEdits { tool_round: false };
        };
        turn.exchange
            .push(Message::assistant(reply_text(&completion)));
        progress.shell_commands = extract_shell_commands(&completion.text);

        let ctx = ParseContext::new(self.editable.iter().cloned());
        match self.config.format.parse(&completion.text, &ctx) {
            Ok(ops) if !ops.is_empty() => {
                debug!(edits = ops.len(), "edits extracted");
                progress.ops = ops;
                TurnEvent::EditsFound
            }
            Ok(_) => {
                let tool_round = self
                    .run_tools(turn, &completion.tool_calls, cancel)
                    .await;
                TurnEvent::NoEdits { tool_round }
            }
            Err(error) => {
                warn!(error = %error, "reply could not be parsed");
                progress.signal = Some(ReflectionSignal::malformed(
                    &error,
                    &[],
                    self.config.format,
                ));
                TurnEvent::Malformed
            }
        }
    }

    fn apply(&mut self, progress: &mut TurnProgress, cancel: &CancellationToken) -> TurnEvent {
        if cancel.is_cancelled() {
            return TurnEvent::Interrupted;
        }
        let ops = std::mem::take(&mut progress.ops);
        let result = match self.engine.dry_run(&ops) {
            Ok(plan) => self.engine.commit(plan),
            Err(error) => ApplyResult {
                applied: Vec::new(),
                failed: error.flatten(),
            },
        };

        let applied = result.files_touched();
        for path in &applied {
            if !progress.files_changed.contains(path) {
                progress.files_changed.push(path.clone());
            }
            if !progress.pending_commit.contains(path) {
                progress.pending_commit.push(path.clone());
            }
        }
        for change in &result.applied {
            if change.kind == EditKind::Create {
                self.add_editable(change.path.clone());
            }
        }

        let failed_paths: Vec<String> = result
            .failed
            .iter()
            .map(|f| f.path.clone().unwrap_or_default())
            .collect();
        self.emit(UnifiedStreamEvent::EditsApplied {
            files: applied.clone(),
            failed: failed_paths,
        });

        match MalformedEdit::combine(result.failed) {
            Some(error) => {
                progress.signal = Some(ReflectionSignal::malformed(
                    &error,
                    &applied,
                    self.config.format,
                ));
                TurnEvent::Applied { any_failed: true }
            }
            None => TurnEvent::Applied { any_failed: false },
        }
    }

    async fn gate(
        &mut self,
        turn: &Turn,
        progress: &mut TurnProgress,
        cancel: &CancellationToken,
    ) -> TurnEvent {
        let Some(gates) = &self.gates else {
            progress.pending_commit.clear();
            return TurnEvent::Gated { reflect: false };
        };

        let input = PipelineInput {
            touched_files: std::mem::take(&mut progress.pending_commit),
            commit_message: commit_message(&turn.request),
            shell_commands: std::mem::take(&mut progress.shell_commands),
        };
        let report = gates.run(&input, cancel).await;

        for outcome in &report.outcomes {
            self.emit(UnifiedStreamEvent::GateCompleted {
                stage: outcome.stage.to_string(),
                status: outcome.status.to_string(),
            });
        }
        if report.commit_id.is_some() {
            progress.commit_id = report.commit_id.clone();
        }
        progress.residual_errors.extend(report.residual_errors);
        for output in report.shell_context {
            progress.carried.push(Message::user(output));
        }

        if report.interrupted {
            return TurnEvent::Interrupted;
        }
        match report.reflection {
            Some(reflection) => {
                let mut signal = ReflectionSignal::from_gate(&reflection);
                if !progress.carried.is_empty() {
                    // Shell output the user agreed to share rides along
                    for message in progress.carried.drain(..) {
                        signal.message.push_str("\n\n");
                        signal.message.push_str(&message.content);
                    }
                }
                progress.signal = Some(signal);
                TurnEvent::Gated { reflect: true }
            }
            None => TurnEvent::Gated { reflect: false },
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Summarize history on the first overflow of a turn
    async fn overflow(&mut self, turn: &mut Turn, message: String) -> TurnEvent {
        let already_summarized = turn.summarized;
        if already_summarized {
            warn!(%message, "context still too large after summarization");
        } else {
            info!(
                %message,
                summarizer = self.summarizer.name(),
                "context too large, summarizing history"
            );
            turn.summarized = true;
            self.history = self.summarizer.summarize(&self.history).await;
        }
        TurnEvent::ContextExceeded {
            message,
            already_summarized,
        }
    }

    /// Execute tool calls and fold their results into the exchange.
    /// Returns whether a tool round happened.
    async fn run_tools(
        &self,
        turn: &mut Turn,
        calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> bool {
        let Some(bridge) = &self.tools else {
            return false;
        };
        if calls.is_empty() {
            return false;
        }
        if turn.tool_rounds >= self.config.max_tool_rounds {
            warn!(rounds = turn.tool_rounds, "tool round limit reached");
            return false;
        }
        turn.tool_rounds += 1;

        let mut body = String::new();
        for call in calls {
            if cancel.is_cancelled() {
                break;
            }
            debug!(tool = %call.name, "calling tool");
            let result = bridge.execute(call).await;
            body.push_str(&format!("Result of tool `{}`:\n{}\n\n", call.name, result));
        }
        turn.exchange.push(Message::user(body.trim_end().to_string()));
        true
    }

    fn read_files(&self) -> FileSet {
        FileSet {
            editable: self.snapshots(&self.editable),
            read_only: self.snapshots(&self.read_only),
        }
    }

    fn snapshots(&self, paths: &[String]) -> Vec<FileSnapshot> {
        paths
            .iter()
            .filter_map(|path| {
                let full = self.engine.root().join(path);
                match std::fs::read_to_string(&full) {
                    Ok(content) => Some(FileSnapshot::new(path.clone(), content)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        Some(FileSnapshot::new(path.clone(), ""))
                    }
                    Err(e) => {
                        warn!(path = %path, error = %e, "file left out of context");
                        None
                    }
                }
            })
            .collect()
    }

    fn finish(&mut self, turn: &Turn, progress: &mut TurnProgress) {
        let Some(reply) = turn.last_reply() else {
            return;
        };
        self.history.push(Message::user(turn.request.clone()));
        self.history.push(Message::assistant(reply.to_string()));
        for message in progress.carried.drain(..) {
            self.history.push(message);
            self.history
                .push(Message::assistant("Ok, I have seen the command output."));
        }
    }

    fn emit(&self, event: UnifiedStreamEvent) {
        if let Some(sink) = &self.display {
            let _ = sink.send(event);
        }
    }
}

/// What goes into the exchange for an assistant reply
fn reply_text(completion: &Completion) -> String {
    if !completion.text.trim().is_empty() || completion.tool_calls.is_empty() {
        return completion.text.clone();
    }
    completion
        .tool_calls
        .iter()
        .map(|call| format!("Calling tool `{}` with {}", call.name, call.arguments))
        .collect::<Vec<_>>()
        .join("\n")
}

fn commit_message(request: &str) -> String {
    let first = request.lines().next().unwrap_or_default().trim();
    let mut summary: String = first.chars().take(72).collect();
    if summary.is_empty() {
        summary.push_str("apply edits");
    }
    format!("editflow: {}", summary)
}
