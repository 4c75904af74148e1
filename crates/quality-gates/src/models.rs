//! Quality Gates Models
//!
//! Data structures for project detection and gate results.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported project types for command detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    /// Node.js/JavaScript/TypeScript project (package.json)
    NodeJs,
    /// Rust project (Cargo.toml)
    Rust,
    /// Python project (pyproject.toml, setup.py, requirements.txt)
    Python,
    /// Go project (go.mod)
    Go,
    /// Unknown/unsupported project type
    Unknown,
}

impl ProjectType {
    /// Get human-readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            ProjectType::NodeJs => "Node.js",
            ProjectType::Rust => "Rust",
            ProjectType::Python => "Python",
            ProjectType::Go => "Go",
            ProjectType::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for ProjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Project metadata extracted from configuration files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub name: Option<String>,
    pub version: Option<String>,
    pub has_tests: bool,
    pub test_framework: Option<String>,
    /// A linter is configured (eslint, ruff, flake8, ...)
    pub linter: Option<String>,
}

/// Result of project type detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDetectionResult {
    pub project_type: ProjectType,
    pub marker_file: Option<String>,
    pub metadata: ProjectMetadata,
    /// Suggested lint commands keyed by file extension (no leading dot)
    pub lint_commands: HashMap<String, String>,
    /// Suggested project-wide test command
    pub test_command: Option<String>,
}

/// Gate status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Passed,
    Failed,
    /// Disabled, nothing to do, or interrupted before it ran
    Skipped,
}

impl GateStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, GateStatus::Failed)
    }
}

impl std::fmt::Display for GateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateStatus::Passed => write!(f, "passed"),
            GateStatus::Failed => write!(f, "failed"),
            GateStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStage {
    Commit,
    Lint,
    Shell,
    Test,
}

impl GateStage {
    pub const ALL: [GateStage; 4] = [
        GateStage::Commit,
        GateStage::Lint,
        GateStage::Shell,
        GateStage::Test,
    ];
}

impl std::fmt::Display for GateStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateStage::Commit => write!(f, "commit"),
            GateStage::Lint => write!(f, "lint"),
            GateStage::Shell => write!(f, "shell"),
            GateStage::Test => write!(f, "test"),
        }
    }
}

/// Result from a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateOutcome {
    pub stage: GateStage,
    pub status: GateStatus,
    pub findings: Vec<String>,
    /// Captured output (or the skip reason)
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl GateOutcome {
    pub fn passed(stage: GateStage, output: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            stage,
            status: GateStatus::Passed,
            findings: Vec::new(),
            output: output.into(),
            commit_id: None,
            duration_ms,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(
        stage: GateStage,
        output: impl Into<String>,
        findings: Vec<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            stage,
            status: GateStatus::Failed,
            findings,
            output: output.into(),
            commit_id: None,
            duration_ms,
            completed_at: Utc::now(),
        }
    }

    pub fn skipped(stage: GateStage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            status: GateStatus::Skipped,
            findings: Vec::new(),
            output: reason.into(),
            commit_id: None,
            duration_ms: 0,
            completed_at: Utc::now(),
        }
    }

    pub fn with_commit(mut self, commit_id: impl Into<String>) -> Self {
        self.commit_id = Some(commit_id.into());
        self
    }
}

/// One problem reported by a linter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintFinding {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub message: String,
}

impl std::fmt::Display for LintFinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{}:{}: {}", file, line, self.message),
            (Some(file), None) => write!(f, "{}: {}", file, self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

/// Result of running a test (or any shell) command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub passed: bool,
    pub output: String,
}
