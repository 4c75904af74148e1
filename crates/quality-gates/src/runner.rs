//! Subprocess Runners
//!
//! Shell command execution with a timeout and bounded output capture, plus
//! the `Linter` and `TestRunner` implementations built on it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::join_all;
use regex::Regex;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::collaborators::{Linter, TestRunner};
use crate::error::{GateError, GateResult};
use crate::models::{LintFinding, TestReport};

/// Maximum captured output per command (bytes).
const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// Captured result of one command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: i32,
    /// stdout followed by stderr
    pub output: String,
    pub duration_ms: u64,
}

/// Run `command_line` through the platform shell in `cwd`.
pub async fn run_shell(command_line: &str, cwd: &Path, timeout_secs: u64) -> GateResult<CommandOutput> {
    let start = Instant::now();

    let mut cmd = shell_command(command_line);
    cmd.current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(command = command_line, cwd = %cwd.display(), "running command");

    let output = match timeout(Duration::from_secs(timeout_secs), cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(GateError::command(format!(
                "Failed to execute '{}': {}",
                command_line, e
            )))
        }
        Err(_) => {
            return Err(GateError::Timeout {
                command: command_line.to_string(),
                secs: timeout_secs,
            })
        }
    };

    let mut text = truncate_output(&output.stdout);
    let stderr = truncate_output(&output.stderr);
    if !stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }

    Ok(CommandOutput {
        success: output.status.success(),
        exit_code: output.status.code().unwrap_or(-1),
        output: text,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

#[cfg(not(windows))]
fn shell_command(command_line: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command_line);
    cmd
}

#[cfg(windows)]
fn shell_command(command_line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command_line);
    cmd
}

/// Quote a path for the shell command line.
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | ':' | '@'));
    if safe {
        arg.to_string()
    } else if cfg!(windows) {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

fn truncate_output(bytes: &[u8]) -> String {
    let s = String::from_utf8_lossy(bytes);
    if s.len() > MAX_OUTPUT_SIZE {
        let mut cut = MAX_OUTPUT_SIZE;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}\n... (output truncated)", &s[..cut])
    } else {
        s.into_owned()
    }
}

fn finding_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<file>[^:\s][^:]*):(?P<line>\d+)(?::\d+)?:?\s*(?P<msg>.*)$")
            .expect("lint finding pattern is valid")
    })
}

/// Parse `file:line[:col]: message` lines out of linter output.
///
/// Output with no recognizable location becomes a single finding holding the
/// whole text.
pub fn parse_lint_output(output: &str) -> Vec<LintFinding> {
    let pattern = finding_pattern();
    let findings: Vec<LintFinding> = output
        .lines()
        .filter_map(|line| {
            let caps = pattern.captures(line.trim_end())?;
            Some(LintFinding {
                file: Some(caps["file"].to_string()),
                line: caps["line"].parse().ok(),
                message: caps["msg"].trim().to_string(),
            })
        })
        .collect();

    if findings.is_empty() && !output.trim().is_empty() {
        return vec![LintFinding {
            file: None,
            line: None,
            message: output.trim().to_string(),
        }];
    }
    findings
}

// ============================================================================
// Command Linter
// ============================================================================

/// Runs per-extension lint commands over the touched files.
///
/// Each command receives the matching files as trailing arguments. Commands
/// for different extensions run concurrently.
pub struct CommandLinter {
    root: PathBuf,
    /// Extension (no leading dot) -> command line
    commands: HashMap<String, String>,
    timeout_secs: u64,
}

impl CommandLinter {
    pub fn new(root: impl Into<PathBuf>, commands: HashMap<String, String>, timeout_secs: u64) -> Self {
        Self {
            root: root.into(),
            commands,
            timeout_secs,
        }
    }

    /// Group files under the configured extensions, sorted for stable output.
    fn plan(&self, files: &[String]) -> Vec<(String, Vec<String>)> {
        let mut groups: HashMap<&str, Vec<String>> = HashMap::new();
        for file in files {
            let ext = Path::new(file)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("");
            if let Some((key, _)) = self.commands.get_key_value(ext) {
                groups.entry(key.as_str()).or_default().push(file.clone());
            }
        }
        let mut plan: Vec<(String, Vec<String>)> = groups
            .into_iter()
            .map(|(ext, files)| (self.commands[ext].clone(), files))
            .collect();
        plan.sort();
        plan
    }
}

#[async_trait]
impl Linter for CommandLinter {
    async fn run(&self, files: &[String]) -> GateResult<Vec<LintFinding>> {
        let plan = self.plan(files);
        if plan.is_empty() {
            return Ok(Vec::new());
        }

        let runs = plan.iter().map(|(command, files)| {
            let quoted: Vec<String> = files.iter().map(|f| shell_quote(f)).collect();
            let line = format!("{} {}", command, quoted.join(" "));
            let root = self.root.clone();
            let timeout_secs = self.timeout_secs;
            async move { (line.clone(), run_shell(&line, &root, timeout_secs).await) }
        });

        let mut findings = Vec::new();
        for (line, result) in join_all(runs).await {
            match result {
                Ok(output) if output.success => {}
                Ok(output) => findings.extend(parse_lint_output(&output.output)),
                Err(e) => {
                    warn!(command = %line, error = %e, "lint command failed to run");
                    findings.push(LintFinding {
                        file: None,
                        line: None,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(findings)
    }
}

// ============================================================================
// Command Test Runner
// ============================================================================

/// Runs test and shell commands from the project root.
pub struct CommandTestRunner {
    root: PathBuf,
    timeout_secs: u64,
}

impl CommandTestRunner {
    pub fn new(root: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            root: root.into(),
            timeout_secs,
        }
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run(&self, command: &str) -> GateResult<TestReport> {
        match run_shell(command, &self.root, self.timeout_secs).await {
            Ok(output) => Ok(TestReport {
                passed: output.success,
                output: output.output,
            }),
            // A hung test suite is a failed run, not a pipeline error
            Err(GateError::Timeout { command, secs }) => Ok(TestReport {
                passed: false,
                output: format!("Command '{}' timed out after {}s", command, secs),
            }),
            Err(e) => Err(e),
        }
    }
}
