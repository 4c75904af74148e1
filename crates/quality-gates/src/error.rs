//! Quality Gate Errors

use thiserror::Error;

use editflow_core::CoreError;

#[derive(Error, Debug)]
pub enum GateError {
    /// A subprocess could not be spawned or waited on
    #[error("Command error: {0}")]
    Command(String),

    #[error("Command '{command}' timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    /// Version control refused the operation
    #[error("Version control error: {0}")]
    Vcs(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GateError {
    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    pub fn vcs(msg: impl Into<String>) -> Self {
        Self::Vcs(msg.into())
    }
}

impl From<CoreError> for GateError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Io(e) => GateError::Io(e),
            CoreError::Parse(msg) => GateError::Parse(msg),
            other => GateError::Command(other.to_string()),
        }
    }
}

pub type GateResult<T> = Result<T, GateError>;
