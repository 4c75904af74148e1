//! Gate Collaborators
//!
//! Capabilities the pipeline consumes. Concrete git and subprocess
//! implementations live in `vcs` and `runner`; tests supply scripted fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GateResult;
use crate::models::{LintFinding, TestReport};

/// Commits and diffs in the working tree.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Commit exactly `files`, returning the new commit id.
    async fn commit(&self, files: &[String], message: &str) -> GateResult<String>;

    async fn diff(&self, files: &[String]) -> GateResult<String>;
}

#[async_trait]
pub trait Linter: Send + Sync {
    /// Lint `files`; an empty list means clean.
    async fn run(&self, files: &[String]) -> GateResult<Vec<LintFinding>>;
}

/// Runs a shell command line and reports pass/fail with output.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, command: &str) -> GateResult<TestReport>;
}

/// What the user is being asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmKind {
    FixLint,
    FixTests,
    RunShell,
    AddShellOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmRequest {
    pub kind: ConfirmKind,
    pub question: String,
    /// The command or findings the question is about
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl ConfirmRequest {
    pub fn new(kind: ConfirmKind, question: impl Into<String>) -> Self {
        Self {
            kind,
            question: question.into(),
            subject: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// Yes/no decisions delegated to the user.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, request: &ConfirmRequest) -> bool;
}

/// Answers every question the same way.
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub bool);

#[async_trait]
impl Confirmer for AutoConfirm {
    async fn confirm(&self, _request: &ConfirmRequest) -> bool {
        self.0
    }
}
