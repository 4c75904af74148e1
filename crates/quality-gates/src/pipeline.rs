//! Post-Apply Gate Pipeline
//!
//! Runs the gate stages in a fixed order after edits land:
//! 1. COMMIT - commit exactly the touched files
//! 2. LINT - per-extension linters over the touched files
//! 3. SHELL - commands the model suggested, each confirmed by the user
//! 4. TEST - the project-wide test command
//!
//! Lint and test failures follow confirm-then-reflect: the user decides
//! whether a failure becomes a corrective retry or stays a residual error.
//! A reflecting stage does not stop later stages. The cancellation token is
//! checked at every stage boundary.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collaborators::{ConfirmKind, ConfirmRequest, Confirmer, Linter, TestRunner, VersionControl};
use crate::models::{GateOutcome, GateStage};

// ============================================================================
// Config / Input
// ============================================================================

/// Which stages run, and the test skip policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub auto_commit: bool,
    pub auto_lint: bool,
    pub allow_shell_commands: bool,
    pub auto_test: bool,
    pub test_command: Option<String>,
    /// Skip the test stage when lint already asked for a retry
    pub skip_tests_after_lint_reflection: bool,
    /// No commits in dry-run mode
    pub dry_run: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            auto_commit: true,
            auto_lint: true,
            allow_shell_commands: true,
            auto_test: false,
            test_command: None,
            skip_tests_after_lint_reflection: false,
            dry_run: false,
        }
    }
}

/// Per-iteration input.
#[derive(Debug, Clone, Default)]
pub struct PipelineInput {
    /// Files changed since the last commit, sorted
    pub touched_files: Vec<String>,
    pub commit_message: String,
    /// Shell commands proposed in the model reply
    pub shell_commands: Vec<String>,
}

// ============================================================================
// Report
// ============================================================================

/// Which stage asked for the retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateFailureKind {
    Lint,
    Test,
}

/// Corrective request produced by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReflection {
    /// Kind of the first stage that asked
    pub kind: GateFailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineReport {
    pub outcomes: Vec<GateOutcome>,
    pub reflection: Option<GateReflection>,
    /// Failures the user chose not to fix
    pub residual_errors: Vec<String>,
    /// Shell output the user agreed to add to the next context
    pub shell_context: Vec<String>,
    pub commit_id: Option<String>,
    pub interrupted: bool,
}

impl PipelineReport {
    fn add_reflection(&mut self, kind: GateFailureKind, message: String) {
        match &mut self.reflection {
            Some(existing) => {
                existing.message.push_str("\n\n");
                existing.message.push_str(&message);
            }
            None => self.reflection = Some(GateReflection { kind, message }),
        }
    }

    pub fn outcome(&self, stage: GateStage) -> Option<&GateOutcome> {
        self.outcomes.iter().find(|o| o.stage == stage)
    }
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct GatePipeline {
    config: PipelineConfig,
    vcs: Option<Arc<dyn VersionControl>>,
    linter: Option<Arc<dyn Linter>>,
    test_runner: Option<Arc<dyn TestRunner>>,
    /// Runs model-suggested shell commands
    shell_runner: Option<Arc<dyn TestRunner>>,
    confirmer: Arc<dyn Confirmer>,
}

impl GatePipeline {
    pub fn new(config: PipelineConfig, confirmer: Arc<dyn Confirmer>) -> Self {
        Self {
            config,
            vcs: None,
            linter: None,
            test_runner: None,
            shell_runner: None,
            confirmer,
        }
    }

    pub fn with_vcs(mut self, vcs: Arc<dyn VersionControl>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    pub fn with_linter(mut self, linter: Arc<dyn Linter>) -> Self {
        self.linter = Some(linter);
        self
    }

    pub fn with_test_runner(mut self, runner: Arc<dyn TestRunner>) -> Self {
        self.test_runner = Some(runner);
        self
    }

    pub fn with_shell_runner(mut self, runner: Arc<dyn TestRunner>) -> Self {
        self.shell_runner = Some(runner);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage in order.
    pub async fn run(&self, input: &PipelineInput, cancel: &CancellationToken) -> PipelineReport {
        let mut report = PipelineReport::default();

        for (index, stage) in GateStage::ALL.iter().copied().enumerate() {
            if cancel.is_cancelled() {
                info!(stage = %stage, "gate pipeline interrupted");
                report.interrupted = true;
                for remaining in &GateStage::ALL[index..] {
                    report
                        .outcomes
                        .push(GateOutcome::skipped(*remaining, "interrupted"));
                }
                break;
            }

            let outcome = match stage {
                GateStage::Commit => self.commit_stage(input, &mut report).await,
                GateStage::Lint => self.lint_stage(input, &mut report).await,
                GateStage::Shell => self.shell_stage(input, &mut report).await,
                GateStage::Test => self.test_stage(&mut report).await,
            };
            debug!(stage = %stage, status = %outcome.status, "gate stage finished");
            report.outcomes.push(outcome);
        }

        report
    }

    async fn commit_stage(&self, input: &PipelineInput, report: &mut PipelineReport) -> GateOutcome {
        let stage = GateStage::Commit;
        let Some(vcs) = self.vcs.as_ref().filter(|_| self.config.auto_commit) else {
            return GateOutcome::skipped(stage, "auto-commit disabled");
        };
        if self.config.dry_run {
            return GateOutcome::skipped(stage, "dry run");
        }
        if input.touched_files.is_empty() {
            return GateOutcome::skipped(stage, "no files changed");
        }

        let start = Instant::now();
        match vcs.commit(&input.touched_files, &input.commit_message).await {
            Ok(commit_id) => {
                report.commit_id = Some(commit_id.clone());
                GateOutcome::passed(stage, format!("Committed {}", commit_id), elapsed_ms(start))
                    .with_commit(commit_id)
            }
            Err(e) => {
                warn!(error = %e, "commit failed");
                report.residual_errors.push(e.to_string());
                GateOutcome::failed(stage, e.to_string(), vec![], elapsed_ms(start))
            }
        }
    }

    async fn lint_stage(&self, input: &PipelineInput, report: &mut PipelineReport) -> GateOutcome {
        let stage = GateStage::Lint;
        let Some(linter) = self.linter.as_ref().filter(|_| self.config.auto_lint) else {
            return GateOutcome::skipped(stage, "auto-lint disabled");
        };
        if input.touched_files.is_empty() {
            return GateOutcome::skipped(stage, "no files changed");
        }

        let start = Instant::now();
        let findings = match linter.run(&input.touched_files).await {
            Ok(findings) => findings,
            Err(e) => {
                warn!(error = %e, "linter failed");
                report.residual_errors.push(e.to_string());
                return GateOutcome::failed(stage, e.to_string(), vec![], elapsed_ms(start));
            }
        };
        if findings.is_empty() {
            return GateOutcome::passed(stage, "", elapsed_ms(start));
        }

        let lines: Vec<String> = findings.iter().map(ToString::to_string).collect();
        let text = lines.join("\n");
        let request = ConfirmRequest::new(ConfirmKind::FixLint, "Attempt to fix lint errors?")
            .with_subject(text.clone());

        if self.confirmer.confirm(&request).await {
            report.add_reflection(
                GateFailureKind::Lint,
                format!("Fix these lint errors in the files you edited:\n\n{}", text),
            );
        } else {
            report.residual_errors.extend(lines.iter().cloned());
        }
        GateOutcome::failed(stage, text, lines, elapsed_ms(start))
    }

    async fn shell_stage(&self, input: &PipelineInput, report: &mut PipelineReport) -> GateOutcome {
        let stage = GateStage::Shell;
        let Some(runner) = self
            .shell_runner
            .as_ref()
            .filter(|_| self.config.allow_shell_commands)
        else {
            return GateOutcome::skipped(stage, "shell commands disabled");
        };
        if input.shell_commands.is_empty() {
            return GateOutcome::skipped(stage, "no shell commands suggested");
        }

        let start = Instant::now();
        let mut ran = Vec::new();
        let mut failures = Vec::new();

        for command in &input.shell_commands {
            let run = ConfirmRequest::new(ConfirmKind::RunShell, "Run shell command?")
                .with_subject(command.clone());
            if !self.confirmer.confirm(&run).await {
                continue;
            }

            let output = match runner.run(command).await {
                Ok(result) => {
                    if !result.passed {
                        failures.push(command.clone());
                    }
                    result.output
                }
                Err(e) => {
                    failures.push(command.clone());
                    e.to_string()
                }
            };
            ran.push(command.clone());

            if !output.trim().is_empty() {
                let add = ConfirmRequest::new(ConfirmKind::AddShellOutput, "Add command output to the chat?")
                    .with_subject(command.clone());
                if self.confirmer.confirm(&add).await {
                    report
                        .shell_context
                        .push(format!("Output of `{}`:\n{}", command, output.trim_end()));
                }
            }
        }

        if ran.is_empty() {
            return GateOutcome::skipped(stage, "no commands confirmed");
        }
        let summary = format!("Ran {} command(s)", ran.len());
        if failures.is_empty() {
            GateOutcome::passed(stage, summary, elapsed_ms(start))
        } else {
            GateOutcome::failed(stage, summary, failures, elapsed_ms(start))
        }
    }

    async fn test_stage(&self, report: &mut PipelineReport) -> GateOutcome {
        let stage = GateStage::Test;
        let runner = self.test_runner.as_ref().filter(|_| self.config.auto_test);
        let (Some(runner), Some(command)) = (runner, self.config.test_command.as_deref()) else {
            return GateOutcome::skipped(stage, "auto-test disabled");
        };
        let lint_reflected = report
            .reflection
            .as_ref()
            .map(|r| r.kind == GateFailureKind::Lint)
            .unwrap_or(false);
        if lint_reflected && self.config.skip_tests_after_lint_reflection {
            return GateOutcome::skipped(stage, "lint errors pending");
        }

        let start = Instant::now();
        let result = match runner.run(command).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "test command failed to run");
                report.residual_errors.push(e.to_string());
                return GateOutcome::failed(stage, e.to_string(), vec![], elapsed_ms(start));
            }
        };
        if result.passed {
            return GateOutcome::passed(stage, result.output, elapsed_ms(start));
        }

        let request = ConfirmRequest::new(ConfirmKind::FixTests, "Attempt to fix test errors?")
            .with_subject(command.to_string());
        if self.confirmer.confirm(&request).await {
            report.add_reflection(
                GateFailureKind::Test,
                format!("The test command `{}` failed:\n\n{}", command, result.output.trim_end()),
            );
        } else {
            report
                .residual_errors
                .push(format!("Tests failed: {}", command));
        }
        GateOutcome::failed(stage, result.output, vec![command.to_string()], elapsed_ms(start))
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::AutoConfirm;
    use crate::error::{GateError, GateResult};
    use crate::models::{GateStatus, LintFinding, TestReport};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeVcs;

    #[async_trait]
    impl VersionControl for FakeVcs {
        async fn commit(&self, files: &[String], _message: &str) -> GateResult<String> {
            Ok(format!("c{}", files.len()))
        }
        async fn diff(&self, _files: &[String]) -> GateResult<String> {
            Ok(String::new())
        }
    }

    struct FakeLinter(Vec<LintFinding>);

    #[async_trait]
    impl Linter for FakeLinter {
        async fn run(&self, _files: &[String]) -> GateResult<Vec<LintFinding>> {
            Ok(self.0.clone())
        }
    }

    struct FakeTests {
        passed: bool,
        runs: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TestRunner for FakeTests {
        async fn run(&self, command: &str) -> GateResult<TestReport> {
            self.runs.lock().unwrap().push(command.to_string());
            Ok(TestReport {
                passed: self.passed,
                output: "1 failed".to_string(),
            })
        }
    }

    struct BrokenTests;

    #[async_trait]
    impl TestRunner for BrokenTests {
        async fn run(&self, command: &str) -> GateResult<TestReport> {
            Err(GateError::command(format!("cannot spawn {}", command)))
        }
    }

    /// Records every question and answers from a per-kind table.
    struct ScriptedConfirmer {
        fix: bool,
        run_shell: bool,
        add_output: bool,
        asked: Mutex<Vec<ConfirmKind>>,
    }

    #[async_trait]
    impl Confirmer for ScriptedConfirmer {
        async fn confirm(&self, request: &ConfirmRequest) -> bool {
            self.asked.lock().unwrap().push(request.kind);
            match request.kind {
                ConfirmKind::FixLint | ConfirmKind::FixTests => self.fix,
                ConfirmKind::RunShell => self.run_shell,
                ConfirmKind::AddShellOutput => self.add_output,
            }
        }
    }

    fn finding() -> LintFinding {
        LintFinding {
            file: Some("app.py".to_string()),
            line: Some(2),
            message: "F821 undefined name 'y'".to_string(),
        }
    }

    fn input() -> PipelineInput {
        PipelineInput {
            touched_files: vec!["app.py".to_string()],
            commit_message: "edit app".to_string(),
            shell_commands: vec![],
        }
    }

    fn tests(passed: bool) -> Arc<FakeTests> {
        Arc::new(FakeTests {
            passed,
            runs: Mutex::new(vec![]),
        })
    }

    fn testing_config() -> PipelineConfig {
        PipelineConfig {
            auto_test: true,
            test_command: Some("pytest".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_stages_run_in_order_and_commit() {
        let pipeline = GatePipeline::new(testing_config(), Arc::new(AutoConfirm(true)))
            .with_vcs(Arc::new(FakeVcs))
            .with_linter(Arc::new(FakeLinter(vec![])))
            .with_test_runner(tests(true));

        let report = pipeline.run(&input(), &CancellationToken::new()).await;
        let stages: Vec<GateStage> = report.outcomes.iter().map(|o| o.stage).collect();
        assert_eq!(stages, GateStage::ALL.to_vec());
        assert_eq!(report.commit_id.as_deref(), Some("c1"));
        assert_eq!(report.outcome(GateStage::Lint).unwrap().status, GateStatus::Passed);
        assert_eq!(report.outcome(GateStage::Shell).unwrap().status, GateStatus::Skipped);
        assert!(report.reflection.is_none());
    }

    #[tokio::test]
    async fn test_dry_run_and_empty_touch_skip_commit() {
        let config = PipelineConfig {
            dry_run: true,
            ..Default::default()
        };
        let pipeline = GatePipeline::new(config, Arc::new(AutoConfirm(true))).with_vcs(Arc::new(FakeVcs));
        let report = pipeline.run(&input(), &CancellationToken::new()).await;
        assert!(report.commit_id.is_none());

        let pipeline = GatePipeline::new(PipelineConfig::default(), Arc::new(AutoConfirm(true)))
            .with_vcs(Arc::new(FakeVcs));
        let report = pipeline
            .run(&PipelineInput::default(), &CancellationToken::new())
            .await;
        assert_eq!(report.outcome(GateStage::Commit).unwrap().output, "no files changed");
    }

    #[tokio::test]
    async fn test_declined_lint_becomes_residual() {
        let pipeline = GatePipeline::new(PipelineConfig::default(), Arc::new(AutoConfirm(false)))
            .with_linter(Arc::new(FakeLinter(vec![finding()])));

        let report = pipeline.run(&input(), &CancellationToken::new()).await;
        assert!(report.reflection.is_none());
        assert_eq!(report.residual_errors, vec!["app.py:2: F821 undefined name 'y'"]);
        assert_eq!(report.outcome(GateStage::Lint).unwrap().status, GateStatus::Failed);
    }

    #[tokio::test]
    async fn test_lint_and_test_reflections_merge() {
        let runner = tests(false);
        let pipeline = GatePipeline::new(testing_config(), Arc::new(AutoConfirm(true)))
            .with_linter(Arc::new(FakeLinter(vec![finding()])))
            .with_test_runner(runner.clone());

        let report = pipeline.run(&input(), &CancellationToken::new()).await;
        let reflection = report.reflection.unwrap();
        assert_eq!(reflection.kind, GateFailureKind::Lint);
        assert!(reflection.message.contains("F821"));
        assert!(reflection.message.contains("`pytest` failed"));
        assert_eq!(runner.runs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_skip_tests_after_lint_reflection_policy() {
        let runner = tests(false);
        let config = PipelineConfig {
            skip_tests_after_lint_reflection: true,
            ..testing_config()
        };
        let pipeline = GatePipeline::new(config, Arc::new(AutoConfirm(true)))
            .with_linter(Arc::new(FakeLinter(vec![finding()])))
            .with_test_runner(runner.clone());

        let report = pipeline.run(&input(), &CancellationToken::new()).await;
        assert_eq!(report.outcome(GateStage::Test).unwrap().status, GateStatus::Skipped);
        assert!(runner.runs.lock().unwrap().is_empty());
        assert_eq!(report.reflection.unwrap().kind, GateFailureKind::Lint);
    }

    #[tokio::test]
    async fn test_test_failure_alone_reflects_as_test() {
        let pipeline = GatePipeline::new(testing_config(), Arc::new(AutoConfirm(true)))
            .with_test_runner(tests(false));
        let report = pipeline.run(&input(), &CancellationToken::new()).await;
        assert_eq!(report.reflection.unwrap().kind, GateFailureKind::Test);
    }

    #[tokio::test]
    async fn test_test_runner_error_is_residual() {
        let pipeline = GatePipeline::new(testing_config(), Arc::new(AutoConfirm(true)))
            .with_test_runner(Arc::new(BrokenTests));
        let report = pipeline.run(&input(), &CancellationToken::new()).await;
        assert!(report.reflection.is_none());
        assert!(report.residual_errors[0].contains("cannot spawn pytest"));
    }

    #[tokio::test]
    async fn test_shell_commands_need_two_confirmations() {
        let confirmer = Arc::new(ScriptedConfirmer {
            fix: false,
            run_shell: true,
            add_output: false,
            asked: Mutex::new(vec![]),
        });
        let runner = tests(true);
        let pipeline = GatePipeline::new(PipelineConfig::default(), confirmer.clone())
            .with_shell_runner(runner.clone());

        let mut input = input();
        input.shell_commands = vec!["python app.py".to_string()];
        let report = pipeline.run(&input, &CancellationToken::new()).await;

        assert_eq!(runner.runs.lock().unwrap().as_slice(), ["python app.py"]);
        assert_eq!(
            confirmer.asked.lock().unwrap().as_slice(),
            [ConfirmKind::RunShell, ConfirmKind::AddShellOutput]
        );
        assert!(report.shell_context.is_empty());
        assert!(report.reflection.is_none());
    }

    #[tokio::test]
    async fn test_shell_output_added_when_confirmed() {
        let pipeline = GatePipeline::new(PipelineConfig::default(), Arc::new(AutoConfirm(true)))
            .with_shell_runner(tests(true));
        let mut input = input();
        input.shell_commands = vec!["ls".to_string()];
        let report = pipeline.run(&input, &CancellationToken::new()).await;
        assert_eq!(report.shell_context.len(), 1);
        assert!(report.shell_context[0].starts_with("Output of `ls`"));
    }

    #[tokio::test]
    async fn test_cancel_skips_remaining_stages() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let runner = tests(false);
        let pipeline = GatePipeline::new(testing_config(), Arc::new(AutoConfirm(true)))
            .with_vcs(Arc::new(FakeVcs))
            .with_test_runner(runner.clone());

        let report = pipeline.run(&input(), &cancel).await;
        assert!(report.interrupted);
        assert_eq!(report.outcomes.len(), 4);
        assert!(report.outcomes.iter().all(|o| o.status == GateStatus::Skipped));
        assert!(report.commit_id.is_none());
        assert!(runner.runs.lock().unwrap().is_empty());
    }

    /// Linter that trips the token while it runs.
    struct CancellingLinter(CancellationToken);

    #[async_trait]
    impl Linter for CancellingLinter {
        async fn run(&self, _files: &[String]) -> GateResult<Vec<LintFinding>> {
            self.0.cancel();
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_pipeline_honored_at_next_boundary() {
        let cancel = CancellationToken::new();
        let runner = tests(true);
        let pipeline = GatePipeline::new(testing_config(), Arc::new(AutoConfirm(true)))
            .with_vcs(Arc::new(FakeVcs))
            .with_linter(Arc::new(CancellingLinter(cancel.clone())))
            .with_test_runner(runner.clone());

        let report = pipeline.run(&input(), &cancel).await;
        assert!(report.interrupted);
        assert_eq!(report.commit_id.as_deref(), Some("c1"));
        assert_eq!(report.outcome(GateStage::Lint).unwrap().status, GateStatus::Passed);
        assert_eq!(report.outcome(GateStage::Test).unwrap().status, GateStatus::Skipped);
        assert!(runner.runs.lock().unwrap().is_empty());
    }
}
