//! Model Gateway Integration Tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use editflow::models::edit::EditFormat;
use editflow::models::turn::Turn;
use editflow::services::context::{ContextBundle, ContextFormatter, FileSet};
use editflow::services::gateway::{ModelError, ModelGateway};
use editflow_core::UnifiedStreamEvent;
use editflow_llm::{
    LlmRequestOptions, LlmResponse, LlmResult, Message, ModelBackend, ToolDefinition,
};

use super::common::*;

fn bundle() -> ContextBundle {
    ContextFormatter::new(EditFormat::SearchReplace, 100_000)
        .build(&Turn::new("rename foo"), None, &FileSet::default(), &[])
        .unwrap()
}

/// Returns before its spawned producer has finished streaming
struct DetachedStream;

#[async_trait]
impl ModelBackend for DetachedStream {
    fn name(&self) -> &'static str {
        "detached"
    }

    fn model(&self) -> &str {
        "detached"
    }

    async fn complete(
        &self,
        _messages: Vec<Message>,
        _tools: Vec<ToolDefinition>,
        _options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        Ok(LlmResponse::text("complete", "detached"))
    }

    async fn stream(
        &self,
        _messages: Vec<Message>,
        _tools: Vec<ToolDefinition>,
        tx: mpsc::Sender<UnifiedStreamEvent>,
        _options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        tokio::spawn(async move {
            for part in ["late ", "tokens ", "arrive"] {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let _ = tx
                    .send(UnifiedStreamEvent::TextDelta {
                        content: part.to_string(),
                    })
                    .await;
            }
        });
        Ok(LlmResponse {
            content: None,
            ..LlmResponse::text("", "detached")
        })
    }
}

#[tokio::test]
async fn test_stream_drained_before_completion() {
    let (display_tx, mut display_rx) = mpsc::unbounded_channel();
    let gateway = ModelGateway::new(Arc::new(DetachedStream)).with_display(display_tx);

    let completion = gateway
        .send(&bundle(), true, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(completion.text, "late tokens arrive");
    assert_eq!(completion.attempts, 1);

    drop(gateway);
    let mut shown = String::new();
    while let Some(event) = display_rx.recv().await {
        if let UnifiedStreamEvent::TextDelta { content } = event {
            shown.push_str(&content);
        }
    }
    assert_eq!(shown, "late tokens arrive");
}

#[tokio::test]
async fn test_non_streaming_uses_complete() {
    let gateway = ModelGateway::new(Arc::new(DetachedStream));
    let completion = gateway
        .send(&bundle(), false, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(completion.text, "complete");
}

#[tokio::test]
async fn test_scripted_stream_matches_reply() {
    let backend = ScriptedBackend::new(vec![Step::Reply(RENAME_REPLY.to_string())]);
    let gateway = ModelGateway::new(backend.clone()).with_retry(fast_retry());
    let completion = gateway
        .send(&bundle(), true, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(completion.text, RENAME_REPLY);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_hanging_request_cancelled() {
    let backend = ScriptedBackend::new(vec![Step::Hang]);
    let gateway = ModelGateway::new(backend);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = gateway.send(&bundle(), false, &cancel).await.unwrap_err();
    assert!(matches!(err, ModelError::Interrupted));
}
