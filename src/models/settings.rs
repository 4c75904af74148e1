//! Settings Models
//!
//! Application configuration stored in config.json.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use editflow_llm::ProviderConfig;

use super::edit::EditFormat;

/// Application configuration stored in config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Model backend settings
    pub provider: ProviderConfig,
    /// Edit format requested from the model
    pub edit_format: EditFormat,
    /// Corrective retries allowed per turn
    pub max_reflections: u32,
    /// Stream responses (display only; parsing always waits for the full reply)
    pub stream: bool,
    pub retry: RetrySettings,
    /// Input token limit; the backend's context window when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_input_tokens: Option<u32>,
    /// Allow indentation and trailing-whitespace tolerant anchor matching
    pub whitespace_flex: bool,
    pub gates: GateSettings,
    pub mcp: McpSettings,
    pub repo_map: RepoMapSettings,
    /// Fallback filter when RUST_LOG is unset
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            edit_format: EditFormat::SearchReplace,
            max_reflections: 3,
            stream: true,
            retry: RetrySettings::default(),
            max_input_tokens: None,
            whitespace_flex: true,
            gates: GateSettings::default(),
            mcp: McpSettings::default(),
            repo_map: RepoMapSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Exponential backoff for retryable backend failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Jitter factor in [0, 1]
    pub randomization: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            randomization: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    pub auto_commit: bool,
    pub auto_lint: bool,
    /// Extension (no dot) -> lint command; files are appended as arguments
    pub lint_commands: HashMap<String, String>,
    pub auto_test: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,
    pub allow_shell_commands: bool,
    pub skip_tests_after_lint_reflection: bool,
    pub command_timeout_secs: u64,
    /// Validate and write edits but never commit
    pub dry_run: bool,
    /// Fill in lint/test commands from project markers when none are set
    pub auto_detect_commands: bool,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            auto_commit: true,
            auto_lint: true,
            lint_commands: HashMap::new(),
            auto_test: false,
            test_command: None,
            allow_shell_commands: true,
            skip_tests_after_lint_reflection: false,
            command_timeout_secs: 300,
            dry_run: false,
            auto_detect_commands: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McpSettings {
    /// JSON file with an `mcpServers` map
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,
    pub request_timeout_secs: u64,
    /// Tool-only model rounds allowed per turn
    pub max_tool_rounds: u32,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            config_path: None,
            request_timeout_secs: 30,
            max_tool_rounds: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoMapSettings {
    pub enabled: bool,
    /// Upper bound on listed files
    pub max_files: usize,
}

impl Default for RepoMapSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_files: 200,
        }
    }
}

impl AppConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.provider.model.trim().is_empty() {
            return Err("provider.model must not be empty".to_string());
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(format!(
                "provider.temperature must be within 0.0..=2.0, got {}",
                self.provider.temperature
            ));
        }
        if self.max_reflections == 0 {
            return Err("max_reflections must be at least 1".to_string());
        }
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.multiplier < 1.0 {
            return Err("retry.multiplier must be >= 1.0".to_string());
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err("retry.initial_delay_ms cannot exceed retry.max_delay_ms".to_string());
        }
        if !(0.0..=1.0).contains(&self.retry.randomization) {
            return Err("retry.randomization must be within 0.0..=1.0".to_string());
        }
        if self.max_input_tokens == Some(0) {
            return Err("max_input_tokens must be positive".to_string());
        }
        if self.gates.command_timeout_secs == 0 {
            return Err("gates.command_timeout_secs must be at least 1".to_string());
        }
        if self.gates.auto_test
            && self.gates.test_command.is_none()
            && !self.gates.auto_detect_commands
        {
            return Err("gates.auto_test requires gates.test_command".to_string());
        }
        if let Some(ext) = self.gates.lint_commands.keys().find(|k| k.starts_with('.')) {
            return Err(format!(
                "gates.lint_commands keys are extensions without a dot, got '{}'",
                ext
            ));
        }
        if self.mcp.request_timeout_secs == 0 {
            return Err("mcp.request_timeout_secs must be at least 1".to_string());
        }
        Ok(())
    }
}
