//! Command Line Interface
//!
//! Argument parsing and wiring of the concrete collaborators: the
//! OpenAI-compatible backend, git, subprocess lint/test runners, MCP
//! servers and a console confirmer.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use editflow_core::UnifiedStreamEvent;
use editflow_llm::{ModelBackend, OpenAIProvider};
use editflow_quality_gates::{
    AutoConfirm, CommandLinter, CommandTestRunner, ConfirmRequest, Confirmer, GatePipeline,
    GitVersionControl, PipelineConfig, ProjectDetector,
};
use editflow_tools::{McpServerManager, McpToolBridge};

use crate::models::edit::EditFormat;
use crate::models::settings::{AppConfig, GateSettings};
use crate::models::turn::TurnResult;
use crate::services::context::ModelSummarizer;
use crate::services::gateway::RetryPolicy;
use crate::services::reflection::{CoordinatorConfig, ReflectionCoordinator};
use crate::services::repo_map::FileListRepoMap;
use crate::storage::ConfigService;
use crate::utils::paths;

#[derive(Debug, Parser)]
#[command(name = "editflow", version, about = "Apply model-proposed code edits with reflection")]
pub struct Cli {
    /// Files the model may edit
    pub files: Vec<String>,

    /// Files added as read-only context
    #[arg(long = "read", value_name = "FILE")]
    pub read: Vec<String>,

    /// Run a single request and exit
    #[arg(short, long)]
    pub message: Option<String>,

    /// Config file (default: ~/.editflow/config.json)
    #[arg(long, env = "EDITFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Repository root
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Edit format: search_replace, unified_diff, whole_file, structured_patch
    #[arg(long)]
    pub format: Option<EditFormat>,

    /// Model name override
    #[arg(long)]
    pub model: Option<String>,

    /// Answer yes to every confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Never commit
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long)]
    pub no_stream: bool,

    /// Used when RUST_LOG is unset; overrides the config value
    #[arg(long)]
    pub log_level: Option<String>,
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Load the config file and apply command-line overrides.
pub fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let service = match &cli.config {
        Some(path) => ConfigService::open(path.clone()),
        None => ConfigService::new(),
    }
    .context("failed to load config")?;

    let mut config = service.get_config().clone();
    if let Some(format) = cli.format {
        config.edit_format = format;
    }
    if let Some(model) = &cli.model {
        config.provider.model = model.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if cli.dry_run {
        config.gates.dry_run = true;
    }
    if cli.no_stream {
        config.stream = false;
    }
    if config.provider.api_key.is_none() {
        config.provider.api_key = std::env::var("OPENAI_API_KEY").ok();
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid config: {}", e))?;
    Ok(config)
}

pub async fn run_with_cli(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("repository root {} not found", cli.root.display()))?;

    let backend: Arc<dyn ModelBackend> = Arc::new(
        OpenAIProvider::new(config.provider.clone()).context("failed to create model backend")?,
    );
    let confirmer: Arc<dyn Confirmer> = if cli.yes {
        Arc::new(AutoConfirm(true))
    } else {
        Arc::new(ConsoleConfirmer)
    };

    let (display_tx, display_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(display_rx));

    let mut coordinator =
        ReflectionCoordinator::new(&root, backend.clone(), CoordinatorConfig::from(&config))
            .with_retry(RetryPolicy::from(&config.retry))
            .with_gates(build_gates(&root, &config.gates, confirmer))
            .with_summarizer(Arc::new(ModelSummarizer::new(backend)))
            .with_display(display_tx);
    if config.repo_map.enabled {
        coordinator = coordinator.with_repo_map(Arc::new(FileListRepoMap::new(
            &root,
            config.repo_map.max_files,
        )));
    }

    let manager = Arc::new(McpServerManager::new(Duration::from_secs(
        config.mcp.request_timeout_secs,
    )));
    let mcp_path = match &config.mcp.config_path {
        Some(path) => Some(path.clone()),
        None => paths::mcp_config_path().ok(),
    };
    if let Some(path) = mcp_path.filter(|p| p.exists()) {
        let servers = McpServerManager::load_config_from_file(&path);
        let failed = manager.start_all(&servers).await;
        for name in &failed {
            warn!(server = %name, "MCP server did not start");
        }
        if servers.len() > failed.len() {
            coordinator = coordinator.with_tools(McpToolBridge::new(manager.clone()));
        }
    }

    for file in &cli.files {
        coordinator.add_editable(chat_path(&root, file));
    }
    for file in &cli.read {
        coordinator.add_read_only(chat_path(&root, file));
    }

    let result = match &cli.message {
        Some(message) => run_once(&mut coordinator, message).await.map(|_| ()),
        None => repl(&mut coordinator, &root).await,
    };

    manager.stop_all_servers().await;
    drop(coordinator);
    let _ = printer.await;
    result
}

fn build_gates(root: &Path, settings: &GateSettings, confirmer: Arc<dyn Confirmer>) -> GatePipeline {
    let mut lint_commands = settings.lint_commands.clone();
    let mut test_command = settings.test_command.clone();

    if settings.auto_detect_commands && (lint_commands.is_empty() || test_command.is_none()) {
        match ProjectDetector::new(root).detect() {
            Ok(detected) => {
                info!(project = detected.project_type.display_name(), "project detected");
                if lint_commands.is_empty() {
                    lint_commands = detected.lint_commands;
                }
                if test_command.is_none() {
                    test_command = detected.test_command;
                }
            }
            Err(e) => warn!(error = %e, "project detection failed"),
        }
    }

    let config = PipelineConfig {
        auto_commit: settings.auto_commit,
        auto_lint: settings.auto_lint,
        allow_shell_commands: settings.allow_shell_commands,
        auto_test: settings.auto_test,
        test_command,
        skip_tests_after_lint_reflection: settings.skip_tests_after_lint_reflection,
        dry_run: settings.dry_run,
    };
    let timeout = settings.command_timeout_secs;
    GatePipeline::new(config, confirmer)
        .with_vcs(Arc::new(GitVersionControl::new(root)))
        .with_linter(Arc::new(CommandLinter::new(root, lint_commands, timeout)))
        .with_test_runner(Arc::new(CommandTestRunner::new(root, timeout)))
        .with_shell_runner(Arc::new(CommandTestRunner::new(root, timeout)))
}

/// Paths are kept relative to the root with forward slashes.
fn chat_path(root: &Path, file: &str) -> String {
    let path = Path::new(file);
    let relative = if path.is_absolute() {
        path.strip_prefix(root).unwrap_or(path)
    } else {
        path
    };
    let text = relative.to_string_lossy().replace('\\', "/");
    paths::normalize_relative(&text).unwrap_or(text)
}

async fn run_once(coordinator: &mut ReflectionCoordinator, message: &str) -> anyhow::Result<TurnResult> {
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let result = coordinator.run_turn(message, &cancel).await;
    interrupt.abort();
    print_result(&result);
    Ok(result)
}

async fn repl(coordinator: &mut ReflectionCoordinator, root: &Path) -> anyhow::Result<()> {
    loop {
        let Some(line) = read_line("> ").await? else {
            return Ok(());
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once(' ').unwrap_or((line, "")) {
            ("/exit" | "/quit", _) => return Ok(()),
            ("/add", rest) => {
                for file in rest.split_whitespace() {
                    coordinator.add_editable(chat_path(root, file));
                }
            }
            ("/read", rest) => {
                for file in rest.split_whitespace() {
                    coordinator.add_read_only(chat_path(root, file));
                }
            }
            ("/clear", _) => coordinator.clear_history(),
            ("/files", _) => {
                println!("editable: {}", coordinator.editable().join(" "));
                println!("read-only: {}", coordinator.read_only().join(" "));
            }
            _ => {
                run_once(coordinator, line).await?;
            }
        }
    }
}

fn print_result(result: &TurnResult) {
    println!();
    if !result.files_changed.is_empty() {
        println!("Changed: {}", result.files_changed.join(", "));
    }
    if let Some(commit) = &result.commit_id {
        println!("Commit: {}", commit);
    }
    for error in &result.residual_errors {
        println!("Unresolved: {}", error);
    }
    println!(
        "Outcome: {} ({} reflections, {} tokens)",
        result.outcome,
        result.reflection_count,
        result.usage.total_tokens()
    );
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<UnifiedStreamEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            UnifiedStreamEvent::TextDelta { content } => {
                print!("{}", content);
                let _ = std::io::stdout().flush();
            }
            UnifiedStreamEvent::EditsApplied { files, failed } => {
                if !files.is_empty() {
                    eprintln!("\nApplied edits to {}", files.join(", "));
                }
                if !failed.is_empty() {
                    eprintln!("Failed edits for {}", failed.join(", "));
                }
            }
            UnifiedStreamEvent::GateCompleted { stage, status } => {
                eprintln!("{}: {}", stage, status);
            }
            UnifiedStreamEvent::ReflectionTriggered { kind, count } => {
                eprintln!("Reflecting ({}, attempt {})", kind, count);
            }
            _ => {}
        }
    }
}

/// Read one line from stdin off the runtime. `None` on end of input.
async fn read_line(prompt: &str) -> anyhow::Result<Option<String>> {
    let prompt = prompt.to_string();
    let line = tokio::task::spawn_blocking(move || -> std::io::Result<Option<String>> {
        print!("{}", prompt);
        std::io::stdout().flush()?;
        let mut line = String::new();
        let read = std::io::stdin().read_line(&mut line)?;
        Ok((read > 0).then_some(line))
    })
    .await
    .context("stdin reader failed")??;
    Ok(line)
}

/// Asks on the terminal
struct ConsoleConfirmer;

#[async_trait]
impl Confirmer for ConsoleConfirmer {
    async fn confirm(&self, request: &ConfirmRequest) -> bool {
        if let Some(subject) = &request.subject {
            eprintln!("\n{}", subject.trim_end());
        }
        let prompt = format!("{} (y/n) ", request.question);
        match read_line(&prompt).await {
            Ok(Some(answer)) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arguments() {
        let cli = Cli::try_parse_from([
            "editflow",
            "src/a.py",
            "src/b.py",
            "--read",
            "README.md",
            "--format",
            "udiff",
            "-y",
            "-m",
            "rename foo",
        ])
        .unwrap();
        assert_eq!(cli.files, vec!["src/a.py", "src/b.py"]);
        assert_eq!(cli.read, vec!["README.md"]);
        assert_eq!(cli.format, Some(EditFormat::UnifiedDiff));
        assert!(cli.yes);
        assert_eq!(cli.message.as_deref(), Some("rename foo"));
    }

    #[test]
    fn test_bad_format_rejected() {
        assert!(Cli::try_parse_from(["editflow", "--format", "poem"]).is_err());
    }

    #[test]
    fn test_chat_path_relative_to_root() {
        let root = Path::new("/repo");
        assert_eq!(chat_path(root, "/repo/src/a.py"), "src/a.py");
        assert_eq!(chat_path(root, "./src/a.py"), "src/a.py");
    }

    #[test]
    fn test_config_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cli = Cli::try_parse_from([
            "editflow",
            "--config",
            path.to_str().unwrap(),
            "--format",
            "whole",
            "--model",
            "gpt-4o-mini",
            "--dry-run",
            "--no-stream",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.edit_format, EditFormat::WholeFile);
        assert_eq!(config.provider.model, "gpt-4o-mini");
        assert!(config.gates.dry_run);
        assert!(!config.stream);
        assert!(path.exists());
    }
}
