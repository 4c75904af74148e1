//! Reflection Coordinator Integration Tests
//!
//! Full turns against a scripted backend, a temp repository and fake gate
//! collaborators.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use editflow::models::edit::EditFormat;
use editflow::models::turn::TurnOutcome;
use editflow_llm::{LlmError, MessageRole};
use editflow_tools::{McpTool, McpToolBridge, ToolCallResult, ToolProtocolClient, ToolResult};

use super::common::*;

fn sr() -> editflow::services::reflection::CoordinatorConfig {
    config(EditFormat::SearchReplace)
}

// ============================================================================
// Success and reflection
// ============================================================================

#[tokio::test]
async fn test_rename_applies_and_commits() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    let backend = ScriptedBackend::new(vec![Step::Reply(RENAME_REPLY.to_string())]);
    let vcs = Arc::new(RecordingVcs::default());
    let mut coordinator = coordinator(&dir, backend.clone(), sr(), &["src/util.py"])
        .with_gates(gates(vcs.clone(), ScriptedLinter::default(), true));

    let result = coordinator
        .run_turn("rename foo to bar", &CancellationToken::new())
        .await;

    assert_eq!(result.outcome, TurnOutcome::Success);
    assert_eq!(result.reflection_count, 0);
    assert_eq!(result.files_changed, vec!["src/util.py".to_string()]);
    assert_eq!(result.commit_id.as_deref(), Some("c1"));
    assert!(result.residual_errors.is_empty());
    assert_eq!(result.usage.input_tokens, 100);
    assert_eq!(backend.calls(), 1);
    assert_eq!(vcs.commits(), vec![vec!["src/util.py".to_string()]]);
    assert_eq!(read(&dir, "src/util.py"), RENAMED_UTIL_PY);
}

#[tokio::test]
async fn test_stale_anchor_reflects_with_file_context() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    let changed = "def foo():\n    return 7\n\n\ndef main():\n    print(foo())\n";
    let retry = "src/util.py\n<<<<<<< SEARCH\ndef foo():\n    return 7\n=======\ndef bar():\n    return 7\n>>>>>>> REPLACE\n\nsrc/util.py\n<<<<<<< SEARCH\n    print(foo())\n=======\n    print(bar())\n>>>>>>> REPLACE\n";
    let backend = ScriptedBackend::new(vec![
        Step::EditThenReply {
            path: dir.path().join("src/util.py"),
            content: changed.to_string(),
            reply: RENAME_REPLY.to_string(),
        },
        Step::Reply(retry.to_string()),
    ]);
    let mut coordinator = coordinator(&dir, backend.clone(), sr(), &["src/util.py"]);

    let result = coordinator
        .run_turn("rename foo to bar", &CancellationToken::new())
        .await;

    assert_eq!(result.outcome, TurnOutcome::Success);
    assert_eq!(result.reflection_count, 1);
    assert_eq!(backend.calls(), 2);

    let first = backend.request(0);
    assert!(first.iter().any(|m| m.content.contains("    return 1")));
    assert!(!first.iter().any(|m| m.content.contains("    return 7")));

    let second = backend.request(1);
    let corrective = &second[second.len() - 2];
    assert_eq!(corrective.role, MessageRole::User);
    assert!(corrective.content.contains("## Edit to src/util.py failed"));
    assert!(corrective.content.contains("Did you mean"));
    assert!(corrective.content.contains("    return 7"));
    assert_eq!(
        read(&dir, "src/util.py"),
        "def bar():\n    return 7\n\n\ndef main():\n    print(bar())\n"
    );
}

#[tokio::test]
async fn test_partial_batch_commits_both_files_together() {
    let dir = repo(&[("a.py", "x = 1\n"), ("b.py", "y = 2\n")]);
    let first = "a.py\n<<<<<<< SEARCH\nx = 1\n=======\nx = 10\n>>>>>>> REPLACE\n\nb.py\n<<<<<<< SEARCH\ny = 3\n=======\ny = 20\n>>>>>>> REPLACE\n";
    let second = "b.py\n<<<<<<< SEARCH\ny = 2\n=======\ny = 20\n>>>>>>> REPLACE\n";
    let backend = ScriptedBackend::new(vec![
        Step::Reply(first.to_string()),
        Step::Reply(second.to_string()),
    ]);
    let vcs = Arc::new(RecordingVcs::default());
    let mut coordinator = coordinator(&dir, backend.clone(), sr(), &["a.py", "b.py"])
        .with_gates(gates(vcs.clone(), ScriptedLinter::default(), true));

    let result = coordinator
        .run_turn("bump both constants", &CancellationToken::new())
        .await;

    assert_eq!(result.outcome, TurnOutcome::Success);
    assert_eq!(result.reflection_count, 1);
    assert_eq!(read(&dir, "a.py"), "x = 10\n");
    assert_eq!(read(&dir, "b.py"), "y = 20\n");
    assert_eq!(
        vcs.commits(),
        vec![vec!["a.py".to_string(), "b.py".to_string()]]
    );

    let corrective = backend.request(1);
    let corrective = &corrective[corrective.len() - 2].content;
    assert!(corrective.contains("b.py"));
    assert!(corrective.contains("a.py"));
}

#[tokio::test]
async fn test_malformed_replies_stop_at_reflection_ceiling() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    let broken = "src/util.py\n<<<<<<< SEARCH\ndef foo():\n>>>>>>> REPLACE\n";
    let backend = ScriptedBackend::always(Step::Reply(broken.to_string()));
    let mut coordinator = coordinator(&dir, backend.clone(), sr(), &["src/util.py"]);

    let result = coordinator
        .run_turn("rename foo to bar", &CancellationToken::new())
        .await;

    assert_eq!(result.outcome, TurnOutcome::MaxReflections);
    assert_eq!(result.reflection_count, 3);
    assert_eq!(backend.calls(), 4);
    assert!(result.files_changed.is_empty());
    assert_eq!(read(&dir, "src/util.py"), UTIL_PY);
}

#[tokio::test]
async fn test_zero_ceiling_never_reflects() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    let broken = "src/util.py\n<<<<<<< SEARCH\ndef foo():\n>>>>>>> REPLACE\n";
    let backend = ScriptedBackend::always(Step::Reply(broken.to_string()));
    let mut config = sr();
    config.max_reflections = 0;
    let mut coordinator = coordinator(&dir, backend.clone(), config, &["src/util.py"]);

    let result = coordinator
        .run_turn("rename foo to bar", &CancellationToken::new())
        .await;

    assert_eq!(result.outcome, TurnOutcome::MaxReflections);
    assert_eq!(result.reflection_count, 0);
    assert_eq!(backend.calls(), 1);
}

// ============================================================================
// Quality gates
// ============================================================================

#[tokio::test]
async fn test_declined_lint_becomes_residual_error() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    let backend = ScriptedBackend::new(vec![Step::Reply(RENAME_REPLY.to_string())]);
    let vcs = Arc::new(RecordingVcs::default());
    let linter = ScriptedLinter::new(vec![vec![finding("src/util.py", 2, "E501 line too long")]]);
    let mut coordinator = coordinator(&dir, backend.clone(), sr(), &["src/util.py"])
        .with_gates(gates(vcs, linter, false));

    let result = coordinator
        .run_turn("rename foo to bar", &CancellationToken::new())
        .await;

    assert_eq!(result.outcome, TurnOutcome::Success);
    assert_eq!(result.reflection_count, 0);
    assert_eq!(
        result.residual_errors,
        vec!["src/util.py:2: E501 line too long".to_string()]
    );
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_confirmed_lint_reflects_to_model() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    let backend = ScriptedBackend::new(vec![
        Step::Reply(RENAME_REPLY.to_string()),
        Step::Reply("That warning is a false positive, nothing to change.".to_string()),
    ]);
    let vcs = Arc::new(RecordingVcs::default());
    let linter = ScriptedLinter::new(vec![vec![finding("src/util.py", 2, "E501 line too long")]]);
    let mut coordinator = coordinator(&dir, backend.clone(), sr(), &["src/util.py"])
        .with_gates(gates(vcs.clone(), linter, true));

    let result = coordinator
        .run_turn("rename foo to bar", &CancellationToken::new())
        .await;

    assert_eq!(result.outcome, TurnOutcome::Success);
    assert_eq!(result.reflection_count, 1);
    assert_eq!(result.commit_id.as_deref(), Some("c1"));
    assert!(result.residual_errors.is_empty());

    let second = backend.request(1);
    let corrective = &second[second.len() - 2].content;
    assert!(corrective.starts_with("Fix these lint errors"));
    assert!(corrective.contains("src/util.py:2: E501 line too long"));
}

// ============================================================================
// Context overflow
// ============================================================================

#[tokio::test]
async fn test_backend_overflow_summarizes_once_then_succeeds() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    let backend = ScriptedBackend::new(vec![
        context_overflow(),
        Step::Reply(RENAME_REPLY.to_string()),
    ]);
    let summarizer = Arc::new(CountingSummarizer::default());
    let mut coordinator = coordinator(&dir, backend.clone(), sr(), &["src/util.py"])
        .with_summarizer(summarizer.clone());

    let result = coordinator
        .run_turn("rename foo to bar", &CancellationToken::new())
        .await;

    assert_eq!(result.outcome, TurnOutcome::Success);
    assert_eq!(result.reflection_count, 0);
    assert_eq!(summarizer.calls(), 1);
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_second_overflow_ends_turn() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    let backend = ScriptedBackend::always(context_overflow());
    let summarizer = Arc::new(CountingSummarizer::default());
    let mut coordinator = coordinator(&dir, backend.clone(), sr(), &["src/util.py"])
        .with_summarizer(summarizer.clone());

    let result = coordinator
        .run_turn("rename foo to bar", &CancellationToken::new())
        .await;

    assert!(matches!(result.outcome, TurnOutcome::ContextExceeded { .. }));
    assert_eq!(summarizer.calls(), 1);
    assert_eq!(backend.calls(), 2);
    assert_eq!(read(&dir, "src/util.py"), UTIL_PY);
}

#[tokio::test]
async fn test_formatter_overflow_never_calls_backend() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    let backend = ScriptedBackend::new(vec![Step::Reply(RENAME_REPLY.to_string())]);
    let mut config = sr();
    config.max_input_tokens = Some(10);
    let mut coordinator = coordinator(&dir, backend.clone(), config, &["src/util.py"]);

    let result = coordinator
        .run_turn("rename foo to bar", &CancellationToken::new())
        .await;

    assert!(matches!(result.outcome, TurnOutcome::ContextExceeded { .. }));
    assert_eq!(backend.calls(), 0);
}

// ============================================================================
// Failures and interruption
// ============================================================================

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    let network = || {
        Step::Fail(LlmError::NetworkError {
            message: "connection reset".to_string(),
        })
    };
    let backend = ScriptedBackend::new(vec![
        network(),
        network(),
        Step::Reply(RENAME_REPLY.to_string()),
    ]);
    let mut coordinator = coordinator(&dir, backend.clone(), sr(), &["src/util.py"]);

    let result = coordinator
        .run_turn("rename foo to bar", &CancellationToken::new())
        .await;

    assert_eq!(result.outcome, TurnOutcome::Success);
    assert_eq!(result.reflection_count, 0);
    assert_eq!(backend.calls(), 3);
}

#[tokio::test]
async fn test_auth_failure_is_fatal() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    let backend = ScriptedBackend::always(Step::Fail(LlmError::AuthenticationFailed {
        message: "invalid api key".to_string(),
    }));
    let mut coordinator = coordinator(&dir, backend.clone(), sr(), &["src/util.py"]);

    let result = coordinator
        .run_turn("rename foo to bar", &CancellationToken::new())
        .await;

    match result.outcome {
        TurnOutcome::Fatal { message } => assert!(message.contains("invalid api key")),
        other => panic!("expected fatal, got {:?}", other),
    }
    assert_eq!(backend.calls(), 1);
    assert!(coordinator.history().is_empty());
}

#[tokio::test]
async fn test_interrupt_during_request() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    let backend = ScriptedBackend::new(vec![Step::Hang]);
    let mut coordinator = coordinator(&dir, backend.clone(), sr(), &["src/util.py"]);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        coordinator.run_turn("rename foo to bar", &cancel),
    )
    .await
    .expect("turn should stop once cancelled");

    assert_eq!(result.outcome, TurnOutcome::Interrupted);
    assert!(result.files_changed.is_empty());
    assert_eq!(read(&dir, "src/util.py"), UTIL_PY);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    let backend = ScriptedBackend::new(vec![Step::Reply(RENAME_REPLY.to_string())]);
    let mut coordinator = coordinator(&dir, backend.clone(), sr(), &["src/util.py"]);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = coordinator.run_turn("rename foo to bar", &cancel).await;

    assert_eq!(result.outcome, TurnOutcome::Interrupted);
    assert_eq!(backend.calls(), 0);
}

// ============================================================================
// Tools and history
// ============================================================================

struct LookupTools;

#[async_trait]
impl ToolProtocolClient for LookupTools {
    async fn list_tools(&self) -> ToolResult<Vec<McpTool>> {
        let tool: McpTool = serde_json::from_value(json!({
            "name": "lookup",
            "description": "Find where a symbol is defined",
            "inputSchema": {"type": "object", "properties": {"symbol": {"type": "string"}}}
        }))
        .unwrap();
        Ok(vec![tool])
    }

    async fn call(&self, name: &str, arguments: Value) -> ToolResult<ToolCallResult> {
        assert_eq!(name, "lookup");
        Ok(ToolCallResult::text(format!(
            "{} is defined in src/util.py",
            arguments["symbol"].as_str().unwrap_or("?")
        )))
    }
}

#[tokio::test]
async fn test_tool_round_feeds_result_back() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    let backend = ScriptedBackend::new(vec![
        Step::CallTool {
            name: "lookup".to_string(),
            arguments: json!({"symbol": "foo"}),
        },
        Step::Reply(RENAME_REPLY.to_string()),
    ]);
    let bridge = McpToolBridge::new(Arc::new(LookupTools));
    let mut coordinator =
        coordinator(&dir, backend.clone(), sr(), &["src/util.py"]).with_tools(bridge);

    let result = coordinator
        .run_turn("rename foo to bar", &CancellationToken::new())
        .await;

    assert_eq!(result.outcome, TurnOutcome::Success);
    assert_eq!(result.reflection_count, 0);
    assert_eq!(backend.calls(), 2);

    let first = backend.request(0);
    assert!(first[0].content.contains("lookup: Find where a symbol is defined"));

    let second = backend.request(1);
    let tool_result = &second[second.len() - 2].content;
    assert!(tool_result.contains("Result of tool `lookup`"));
    assert!(tool_result.contains("foo is defined in src/util.py"));
    assert_eq!(read(&dir, "src/util.py"), RENAMED_UTIL_PY);
}

#[tokio::test]
async fn test_history_carries_into_next_turn() {
    let dir = repo(&[("src/util.py", UTIL_PY)]);
    let backend = ScriptedBackend::new(vec![
        Step::Reply(RENAME_REPLY.to_string()),
        Step::Reply("Done already.".to_string()),
    ]);
    let mut coordinator = coordinator(&dir, backend.clone(), sr(), &["src/util.py"]);

    coordinator
        .run_turn("rename foo to bar", &CancellationToken::new())
        .await;
    assert_eq!(coordinator.history().len(), 2);
    assert_eq!(coordinator.history()[0].content, "rename foo to bar");

    coordinator
        .run_turn("anything else?", &CancellationToken::new())
        .await;
    let second = backend.request(1);
    assert!(second.iter().any(|m| m.content == "rename foo to bar"));
    assert!(second
        .iter()
        .any(|m| m.content.contains(RENAMED_UTIL_PY.trim_end())));
    assert_eq!(coordinator.history().len(), 4);
}
