//! editflow Quality Gates
//!
//! What happens after edits land on disk:
//!
//! - `pipeline` - ordered commit/lint/shell/test stages with confirm-then-reflect
//! - `collaborators` - `VersionControl`, `Linter`, `TestRunner`, `Confirmer` traits
//! - `runner` - subprocess execution, `CommandLinter`, `CommandTestRunner`
//! - `vcs` - git CLI wrapper and `GitVersionControl`
//! - `detector` - project type detection and default lint/test commands
//! - `models` - gate outcomes, findings, and detection results

pub mod collaborators;
pub mod detector;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod runner;
pub mod vcs;

pub use collaborators::{
    AutoConfirm, ConfirmKind, ConfirmRequest, Confirmer, Linter, TestRunner, VersionControl,
};
pub use detector::{detect_project_type, ProjectDetector};
pub use error::{GateError, GateResult};
pub use models::{
    GateOutcome, GateStage, GateStatus, LintFinding, ProjectDetectionResult, ProjectMetadata,
    ProjectType, TestReport,
};
pub use pipeline::{
    GateFailureKind, GatePipeline, GateReflection, PipelineConfig, PipelineInput, PipelineReport,
};
pub use runner::{parse_lint_output, run_shell, CommandLinter, CommandTestRunner};
pub use vcs::{GitOps, GitVersionControl};
