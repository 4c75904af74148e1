//! Git Operations
//!
//! Safe wrapper around the git CLI and the `VersionControl` adapter the
//! commit stage uses.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::collaborators::VersionControl;
use crate::error::{GateError, GateResult};

/// Result of a git command execution
#[derive(Debug)]
pub struct GitResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl GitResult {
    /// Return stdout on success, otherwise a `Vcs` error carrying stderr
    pub fn into_result(self) -> GateResult<String> {
        if self.success {
            Ok(self.stdout)
        } else {
            Err(GateError::vcs(format!(
                "Git command failed (exit {}): {}",
                self.exit_code,
                self.stderr.trim()
            )))
        }
    }
}

/// Safe git operations wrapper
#[derive(Debug, Default, Clone)]
pub struct GitOps;

impl GitOps {
    pub fn new() -> Self {
        Self
    }

    /// Execute a git command in the specified directory
    pub async fn execute(&self, cwd: &Path, args: &[&str]) -> GateResult<GitResult> {
        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            // Never block on credential prompts
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GCM_INTERACTIVE", "never")
            .output()
            .await
            .map_err(|e| GateError::command(format!("Failed to execute git: {}", e)))?;

        Ok(GitResult {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    pub async fn is_repo(&self, cwd: &Path) -> bool {
        self.execute(cwd, &["rev-parse", "--is-inside-work-tree"])
            .await
            .map(|r| r.success && r.stdout.trim() == "true")
            .unwrap_or(false)
    }

    /// Stage paths, including deletions
    pub async fn add(&self, cwd: &Path, paths: &[&str]) -> GateResult<()> {
        let mut args = vec!["add", "-A", "--"];
        args.extend(paths);
        self.execute(cwd, &args).await?.into_result()?;
        Ok(())
    }

    /// Commit only `paths`, returning the new HEAD sha.
    pub async fn commit_paths(&self, cwd: &Path, message: &str, paths: &[&str]) -> GateResult<String> {
        let mut args = vec!["commit", "-m", message, "--"];
        args.extend(paths);
        let result = self.execute(cwd, &args).await?;
        if !result.success {
            let detail = if result.stderr.trim().is_empty() {
                result.stdout.trim().to_string()
            } else {
                result.stderr.trim().to_string()
            };
            return Err(GateError::vcs(format!("Commit failed: {}", detail)));
        }
        Ok(self
            .execute(cwd, &["rev-parse", "HEAD"])
            .await?
            .into_result()?
            .trim()
            .to_string())
    }

    /// Diff of `paths` against HEAD, or against the index in a repo without commits.
    pub async fn diff(&self, cwd: &Path, paths: &[&str]) -> GateResult<String> {
        let mut args = vec!["diff", "HEAD", "--"];
        args.extend(paths);
        let result = self.execute(cwd, &args).await?;
        if result.success {
            return Ok(result.stdout);
        }
        let mut args = vec!["diff", "--"];
        args.extend(paths);
        self.execute(cwd, &args).await?.into_result()
    }
}

/// `VersionControl` backed by the git CLI.
pub struct GitVersionControl {
    root: PathBuf,
    git: GitOps,
}

impl GitVersionControl {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            git: GitOps::new(),
        }
    }
}

#[async_trait]
impl VersionControl for GitVersionControl {
    async fn commit(&self, files: &[String], message: &str) -> GateResult<String> {
        let paths: Vec<&str> = files.iter().map(String::as_str).collect();
        self.git.add(&self.root, &paths).await?;
        let sha = self.git.commit_paths(&self.root, message, &paths).await?;
        info!(commit = %sha, files = files.len(), "committed edits");
        Ok(sha)
    }

    async fn diff(&self, files: &[String]) -> GateResult<String> {
        let paths: Vec<&str> = files.iter().map(String::as_str).collect();
        self.git.diff(&self.root, &paths).await
    }
}
