//! Shared fakes and fixtures for the integration suite.

use std::collections::VecDeque;
use std::fs;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;

use editflow::models::edit::EditFormat;
use editflow::services::context::HistorySummarizer;
use editflow::services::gateway::RetryPolicy;
use editflow::services::reflection::{CoordinatorConfig, ReflectionCoordinator};
use editflow_core::UnifiedStreamEvent;
use editflow_llm::{
    LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, ModelBackend, StopReason,
    ToolCall, ToolDefinition, UsageStats,
};
use editflow_quality_gates::{
    AutoConfirm, GateResult, GatePipeline, LintFinding, Linter, PipelineConfig, VersionControl,
};

// ============================================================================
// Model backend
// ============================================================================

/// One scripted backend reaction
#[derive(Debug, Clone)]
pub enum Step {
    Reply(String),
    /// Changes a file on disk while the request is in flight, then replies
    EditThenReply {
        path: std::path::PathBuf,
        content: String,
        reply: String,
    },
    CallTool { name: String, arguments: serde_json::Value },
    Fail(LlmError),
    /// Never answers
    Hang,
}

pub struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    /// Used once the script runs out
    fallback: Option<Step>,
    requests: Mutex<Vec<Vec<Message>>>,
    calls: AtomicU32,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        })
    }

    /// Answers every request with `step`
    pub fn always(step: Step) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(VecDeque::new()),
            fallback: Some(step),
            requests: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Messages sent with request `index`
    pub fn request(&self, index: usize) -> Vec<Message> {
        self.requests.lock().unwrap()[index].clone()
    }

    async fn respond(&self, messages: Vec<Message>) -> LlmResult<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(messages);
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| Step::Reply("Nothing more to do.".to_string()));

        let step = match step {
            Step::EditThenReply {
                path,
                content,
                reply,
            } => {
                fs::write(path, content).unwrap();
                Step::Reply(reply)
            }
            other => other,
        };

        match step {
            Step::Reply(text) => Ok(LlmResponse {
                usage: UsageStats {
                    input_tokens: 100,
                    output_tokens: 20,
                    thinking_tokens: None,
                },
                ..LlmResponse::text(text, "scripted")
            }),
            Step::CallTool { name, arguments } => Ok(LlmResponse {
                content: None,
                thinking: None,
                tool_calls: vec![ToolCall {
                    id: "call_1".to_string(),
                    name,
                    arguments,
                }],
                stop_reason: StopReason::ToolUse,
                usage: UsageStats::default(),
                model: "scripted".to_string(),
            }),
            Step::Fail(err) => Err(err),
            Step::EditThenReply { .. } => unreachable!(),
            Step::Hang => {
                std::future::pending::<()>().await;
                Err(LlmError::Other {
                    message: "unreachable".to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        messages: Vec<Message>,
        _tools: Vec<ToolDefinition>,
        _options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        self.respond(messages).await
    }

    async fn stream(
        &self,
        messages: Vec<Message>,
        _tools: Vec<ToolDefinition>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        _options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let response = self.respond(messages).await?;
        if let Some(text) = &response.content {
            for line in text.split_inclusive('\n') {
                let _ = tx
                    .send(UnifiedStreamEvent::TextDelta {
                        content: line.to_string(),
                    })
                    .await;
            }
        }
        Ok(response)
    }
}

pub fn context_overflow() -> Step {
    Step::Fail(LlmError::ContextLengthExceeded {
        message: "maximum context length is 8192 tokens".to_string(),
        max_tokens: Some(8192),
    })
}

// ============================================================================
// Gate collaborators
// ============================================================================

#[derive(Default)]
pub struct RecordingVcs {
    commits: Mutex<Vec<Vec<String>>>,
}

impl RecordingVcs {
    pub fn commits(&self) -> Vec<Vec<String>> {
        self.commits.lock().unwrap().clone()
    }
}

#[async_trait]
impl VersionControl for RecordingVcs {
    async fn commit(&self, files: &[String], _message: &str) -> GateResult<String> {
        let mut commits = self.commits.lock().unwrap();
        commits.push(files.to_vec());
        Ok(format!("c{}", commits.len()))
    }

    async fn diff(&self, _files: &[String]) -> GateResult<String> {
        Ok(String::new())
    }
}

/// Returns queued findings, then nothing
#[derive(Default)]
pub struct ScriptedLinter {
    runs: Mutex<VecDeque<Vec<LintFinding>>>,
}

impl ScriptedLinter {
    pub fn new(runs: Vec<Vec<LintFinding>>) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
        }
    }
}

#[async_trait]
impl Linter for ScriptedLinter {
    async fn run(&self, _files: &[String]) -> GateResult<Vec<LintFinding>> {
        Ok(self.runs.lock().unwrap().pop_front().unwrap_or_default())
    }
}

pub fn finding(file: &str, line: u32, message: &str) -> LintFinding {
    LintFinding {
        file: Some(file.to_string()),
        line: Some(line),
        message: message.to_string(),
    }
}

pub fn gates(vcs: Arc<RecordingVcs>, linter: ScriptedLinter, confirm: bool) -> GatePipeline {
    let config = PipelineConfig {
        allow_shell_commands: false,
        ..PipelineConfig::default()
    };
    GatePipeline::new(config, Arc::new(AutoConfirm(confirm)))
        .with_vcs(vcs)
        .with_linter(Arc::new(linter))
}

// ============================================================================
// Summarizer
// ============================================================================

#[derive(Default)]
pub struct CountingSummarizer {
    calls: AtomicU32,
}

impl CountingSummarizer {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistorySummarizer for CountingSummarizer {
    async fn summarize(&self, history: &[Message]) -> Vec<Message> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        history.to_vec()
    }

    fn name(&self) -> &str {
        "counting"
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub const UTIL_PY: &str = "def foo():\n    return 1\n\n\ndef main():\n    print(foo())\n";

pub const RENAME_REPLY: &str = "Renaming foo to bar.

src/util.py
```python
<<<<<<< SEARCH
def foo():
    return 1
=======
def bar():
    return 1
>>>>>>> REPLACE
```

src/util.py
```python
<<<<<<< SEARCH
    print(foo())
=======
    print(bar())
>>>>>>> REPLACE
```
";

pub const RENAMED_UTIL_PY: &str = "def bar():\n    return 1\n\n\ndef main():\n    print(bar())\n";

pub fn repo(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }
    dir
}

pub fn read(dir: &TempDir, path: &str) -> String {
    fs::read_to_string(dir.path().join(path)).unwrap()
}

pub fn config(format: EditFormat) -> CoordinatorConfig {
    CoordinatorConfig {
        format,
        max_reflections: 3,
        stream: false,
        max_input_tokens: Some(100_000),
        max_tool_rounds: 3,
        whitespace_flex: true,
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        multiplier: 2.0,
        max_delay: Duration::from_millis(5),
        randomization: 0.0,
    }
}

pub fn coordinator(
    dir: &TempDir,
    backend: Arc<ScriptedBackend>,
    config: CoordinatorConfig,
    editable: &[&str],
) -> ReflectionCoordinator {
    let mut coordinator =
        ReflectionCoordinator::new(dir.path(), backend, config).with_retry(fast_retry());
    for path in editable {
        coordinator.add_editable(*path);
    }
    coordinator
}
