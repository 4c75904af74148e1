//! MCP Client Integration Tests
//!
//! A scripted server on the far end of an in-memory duplex pipe.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

use editflow_llm::ToolCall;
use editflow_tools::{format_tool_result, McpClient, McpToolBridge, ToolError, ToolProtocolClient};

/// Answers the handful of methods the client uses. `slow` never replies;
/// `install` announces a second tool before answering.
async fn serve(stream: DuplexStream) {
    let (read, mut write) = split(stream);
    let mut lines = BufReader::new(read).lines();
    let mut installed = false;

    while let Ok(Some(line)) = lines.next_line().await {
        let request: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(_) => continue,
        };
        let Some(id) = request.get("id").cloned() else {
            continue;
        };
        let method = request["method"].as_str().unwrap_or_default();
        let params = &request["params"];

        let mut out = Vec::new();
        let reply = match method {
            "initialize" => json!({"jsonrpc": "2.0", "id": id, "result": {
                "protocolVersion": "2025-03-26",
                "capabilities": {"tools": {"listChanged": true}},
                "serverInfo": {"name": "scripted", "version": "1.0"}
            }}),
            "tools/list" => {
                let mut tools = vec![json!({
                    "name": "echo",
                    "description": "Echo the text back",
                    "inputSchema": {"type": "object", "properties": {"text": {"type": "string"}}}
                })];
                if installed {
                    tools.push(json!({"name": "reverse", "description": "Reverse the text"}));
                }
                json!({"jsonrpc": "2.0", "id": id, "result": {"tools": tools}})
            }
            "tools/call" => match params["name"].as_str().unwrap_or_default() {
                "echo" => json!({"jsonrpc": "2.0", "id": id, "result": {
                    "content": [{"type": "text", "text": params["arguments"]["text"]}]
                }}),
                "install" => {
                    installed = true;
                    out.push(json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"}));
                    json!({"jsonrpc": "2.0", "id": id, "result": {"content": []}})
                }
                "slow" => continue,
                other => json!({"jsonrpc": "2.0", "id": id, "error": {
                    "code": -32602,
                    "message": format!("unknown tool {}", other)
                }}),
            },
            _ => json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": "Method not found"}}),
        };
        out.push(reply);

        for message in out {
            let mut bytes = serde_json::to_vec(&message).unwrap();
            bytes.push(b'\n');
            if write.write_all(&bytes).await.is_err() {
                return;
            }
        }
        let _ = write.flush().await;
    }
}

async fn connected(timeout: Duration) -> McpClient {
    let (client_end, server_end) = duplex(64 * 1024);
    tokio::spawn(serve(server_end));
    let (read, write) = split(client_end);
    let client = McpClient::new("scripted", read, write, timeout);
    client.initialize().await.unwrap();
    client
}

#[tokio::test]
async fn test_handshake_loads_tools() {
    let client = connected(Duration::from_secs(5)).await;
    assert!(client.is_initialized());

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");
    assert_eq!(tools[0].server.as_deref(), Some("scripted"));
}

#[tokio::test]
async fn test_call_and_rpc_error() {
    let client = connected(Duration::from_secs(5)).await;

    let result = client
        .call_tool("echo", json!({"text": "hello"}))
        .await
        .unwrap();
    assert!(!result.is_error);
    assert_eq!(format_tool_result(&result), "hello");

    let err = client.call_tool("missing", json!({})).await.unwrap_err();
    match err {
        ToolError::Rpc { code, message } => {
            assert_eq!(code, -32602);
            assert!(message.contains("missing"));
        }
        other => panic!("expected rpc error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_list_changed_triggers_refresh() {
    let client = connected(Duration::from_secs(5)).await;
    assert_eq!(client.tools().await.unwrap().len(), 1);

    client.call_tool("install", json!({})).await.unwrap();
    let names: Vec<String> = client
        .tools()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["echo".to_string(), "reverse".to_string()]);
}

#[tokio::test]
async fn test_timeout_does_not_poison_connection() {
    let client = connected(Duration::from_millis(100)).await;

    let err = client.call_tool("slow", json!({})).await.unwrap_err();
    assert!(err.is_timeout());

    let result = client
        .call_tool("echo", json!({"text": "still here"}))
        .await
        .unwrap();
    assert_eq!(format_tool_result(&result), "still here");
}

#[tokio::test]
async fn test_bridge_over_live_client() {
    let client = Arc::new(connected(Duration::from_millis(100)).await);
    let bridge = McpToolBridge::new(client);

    let definitions = bridge.tool_definitions().await.unwrap();
    assert_eq!(definitions[0].name, "echo");
    assert!(bridge.tools_prompt().await.unwrap().unwrap().contains("echo"));

    let ok = bridge
        .execute(&ToolCall {
            id: "1".to_string(),
            name: "echo".to_string(),
            arguments: json!({"text": "hi"}),
        })
        .await;
    assert_eq!(ok, "hi");

    let timed_out = bridge
        .execute(&ToolCall {
            id: "2".to_string(),
            name: "slow".to_string(),
            arguments: Value::Null,
        })
        .await;
    assert!(timed_out.starts_with("Error calling MCP tool 'slow'"));
    assert!(timed_out.contains("timed out"));
}
