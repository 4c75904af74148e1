//! Tool Protocol Errors

use thiserror::Error;

use editflow_core::CoreError;

/// Errors raised while talking to an MCP server.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("MCP request '{method}' (id={id}) timed out after {secs}s")]
    Timeout { method: String, id: i64, secs: u64 },

    #[error("MCP error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("MCP transport error: {0}")]
    Transport(String),

    #[error("MCP client '{0}' is not initialized")]
    NotInitialized(String),

    #[error("Tool '{0}' not found")]
    ToolNotFound(String),

    #[error("MCP server '{0}' not found")]
    ServerNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ToolError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ToolError::Timeout { .. })
    }
}

impl From<ToolError> for CoreError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::Timeout { method, secs, .. } => {
                CoreError::Timeout(format!("{} after {}s", method, secs))
            }
            ToolError::Io(e) => CoreError::Io(e),
            ToolError::ToolNotFound(name) => CoreError::NotFound(name),
            other => CoreError::Command(other.to_string()),
        }
    }
}

/// Result type for tool-protocol operations
pub type ToolResult<T> = Result<T, ToolError>;
