//! JSON-RPC 2.0 Messages
//!
//! Wire types for the MCP stdio transport. Messages are framed one per line:
//! a compact JSON object followed by `\n`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC 2.0 request message.
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: i64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: i64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification message (no id).
#[derive(Debug, Serialize)]
pub struct JsonRpcNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> JsonRpcNotification<'a> {
    pub fn new(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Method-not-found error code.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Any message read from the server.
///
/// Responses carry `id` plus `result` or `error`; notifications carry
/// `method` only; server-initiated requests carry both `id` and `method`.
#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// Classified view of an [`IncomingMessage`].
#[derive(Debug)]
pub enum Incoming {
    Response {
        id: i64,
        outcome: Result<Value, JsonRpcError>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
}

impl IncomingMessage {
    pub fn classify(self) -> Option<Incoming> {
        match (self.id, self.method) {
            (Some(id), Some(method)) => Some(Incoming::Request {
                id,
                method,
                params: self.params,
            }),
            (None, Some(method)) => Some(Incoming::Notification {
                method,
                params: self.params,
            }),
            (Some(id), None) => {
                let id = id.as_i64()?;
                let outcome = match self.error {
                    Some(error) => Err(error),
                    None => Ok(self.result.unwrap_or(Value::Null)),
                };
                Some(Incoming::Response { id, outcome })
            }
            (None, None) => None,
        }
    }
}

/// Encode a message as one newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> serde_json::Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decode one line. Blank lines decode to `None`.
pub fn decode_line(line: &str) -> Option<serde_json::Result<IncomingMessage>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(serde_json::from_str(trimmed))
}
