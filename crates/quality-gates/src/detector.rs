//! Project Type Detection
//!
//! Detects the project type from marker files (Cargo.toml, package.json,
//! pyproject.toml, setup.py, requirements.txt, go.mod) and suggests lint and
//! test commands for it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use editflow_core::{CoreError, CoreResult};

use crate::models::{ProjectDetectionResult, ProjectMetadata, ProjectType};

/// flake8 restricted to errors that mean the file cannot run
const PYTHON_FATAL_LINT: &str =
    "python -m flake8 --select=E9,F821,F823,F831,F406,F407,F701,F702,F704,F706 --show-source --isolated";

/// Project type detector
pub struct ProjectDetector {
    project_path: PathBuf,
}

impl ProjectDetector {
    pub fn new(project_path: impl AsRef<Path>) -> Self {
        Self {
            project_path: project_path.as_ref().to_path_buf(),
        }
    }

    /// Detect the project type
    pub fn detect(&self) -> CoreResult<ProjectDetectionResult> {
        let detections = [
            (ProjectType::Rust, "Cargo.toml"),
            (ProjectType::NodeJs, "package.json"),
            (ProjectType::Python, "pyproject.toml"),
            (ProjectType::Python, "setup.py"),
            (ProjectType::Python, "requirements.txt"),
            (ProjectType::Go, "go.mod"),
        ];

        for (project_type, marker) in detections {
            let marker_path = self.project_path.join(marker);
            if marker_path.exists() {
                let metadata = self.extract_metadata(project_type, &marker_path)?;
                let (lint_commands, test_command) = suggest_commands(project_type, &metadata);

                return Ok(ProjectDetectionResult {
                    project_type,
                    marker_file: Some(marker.to_string()),
                    metadata,
                    lint_commands,
                    test_command,
                });
            }
        }

        Ok(ProjectDetectionResult {
            project_type: ProjectType::Unknown,
            marker_file: None,
            metadata: ProjectMetadata::default(),
            lint_commands: HashMap::new(),
            test_command: None,
        })
    }

    fn extract_metadata(
        &self,
        project_type: ProjectType,
        marker_path: &Path,
    ) -> CoreResult<ProjectMetadata> {
        match project_type {
            ProjectType::NodeJs => self.extract_nodejs_metadata(marker_path),
            ProjectType::Rust => self.extract_rust_metadata(marker_path),
            ProjectType::Python => self.extract_python_metadata(marker_path),
            ProjectType::Go => self.extract_go_metadata(marker_path),
            ProjectType::Unknown => Ok(ProjectMetadata::default()),
        }
    }

    /// Extract metadata from package.json
    fn extract_nodejs_metadata(&self, marker_path: &Path) -> CoreResult<ProjectMetadata> {
        let content = std::fs::read_to_string(marker_path)?;
        let json: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| CoreError::Parse(format!("Failed to parse package.json: {}", e)))?;

        let dev_dep = |name: &str| {
            json.get("devDependencies")
                .and_then(|deps| deps.get(name))
                .is_some()
        };

        let mut metadata = ProjectMetadata {
            name: json.get("name").and_then(|v| v.as_str()).map(String::from),
            version: json.get("version").and_then(|v| v.as_str()).map(String::from),
            ..Default::default()
        };

        let eslint_config = ["eslint.config.js", ".eslintrc.js", ".eslintrc.json", ".eslintrc.yml"]
            .iter()
            .any(|f| self.project_path.join(f).exists());
        if dev_dep("eslint") || eslint_config {
            metadata.linter = Some("eslint".to_string());
        }

        metadata.has_tests = json.get("scripts").and_then(|s| s.get("test")).is_some();
        metadata.test_framework = ["jest", "vitest", "mocha"]
            .into_iter()
            .find(|name| dev_dep(*name))
            .map(String::from);

        Ok(metadata)
    }

    /// Extract metadata from Cargo.toml
    fn extract_rust_metadata(&self, marker_path: &Path) -> CoreResult<ProjectMetadata> {
        let content = std::fs::read_to_string(marker_path)?;
        let toml: toml::Value = content
            .parse()
            .map_err(|e| CoreError::Parse(format!("Failed to parse Cargo.toml: {}", e)))?;

        let package = toml.get("package");
        Ok(ProjectMetadata {
            name: package
                .and_then(|p| p.get("name"))
                .and_then(|v| v.as_str())
                .map(String::from),
            version: package
                .and_then(|p| p.get("version"))
                .and_then(|v| v.as_str())
                .map(String::from),
            has_tests: true,
            test_framework: Some("cargo test".to_string()),
            linter: Some("rustfmt".to_string()),
        })
    }

    /// Extract metadata from Python project files
    fn extract_python_metadata(&self, marker_path: &Path) -> CoreResult<ProjectMetadata> {
        let mut metadata = ProjectMetadata::default();

        let is_pyproject = marker_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n == "pyproject.toml")
            .unwrap_or(false);

        if is_pyproject {
            let content = std::fs::read_to_string(marker_path)?;
            let toml: toml::Value = content
                .parse()
                .map_err(|e| CoreError::Parse(format!("Failed to parse pyproject.toml: {}", e)))?;

            let section = toml
                .get("project")
                .or_else(|| toml.get("tool").and_then(|t| t.get("poetry")));
            if let Some(section) = section {
                metadata.name = section.get("name").and_then(|v| v.as_str()).map(String::from);
                metadata.version = section
                    .get("version")
                    .and_then(|v| v.as_str())
                    .map(String::from);
            }

            let tool = toml.get("tool");
            if tool.and_then(|t| t.get("pytest")).is_some() {
                metadata.has_tests = true;
                metadata.test_framework = Some("pytest".to_string());
            }
            if tool.and_then(|t| t.get("ruff")).is_some() {
                metadata.linter = Some("ruff".to_string());
            }
        }

        if self.project_path.join("tests").exists() {
            metadata.has_tests = true;
            if metadata.test_framework.is_none() {
                metadata.test_framework = Some("pytest".to_string());
            }
        }

        Ok(metadata)
    }

    /// Extract metadata from go.mod
    fn extract_go_metadata(&self, marker_path: &Path) -> CoreResult<ProjectMetadata> {
        let content = std::fs::read_to_string(marker_path)?;
        let name = content
            .lines()
            .find_map(|line| line.strip_prefix("module "))
            .map(|m| m.trim().to_string());

        Ok(ProjectMetadata {
            name,
            version: None,
            has_tests: true,
            test_framework: Some("go test".to_string()),
            linter: Some("go vet".to_string()),
        })
    }
}

/// Lint commands by extension and a test command for the detected project.
fn suggest_commands(
    project_type: ProjectType,
    metadata: &ProjectMetadata,
) -> (HashMap<String, String>, Option<String>) {
    let mut lint = HashMap::new();
    let test = match project_type {
        ProjectType::Rust => {
            lint.insert("rs".to_string(), "rustfmt --check --edition 2021".to_string());
            Some("cargo test".to_string())
        }
        ProjectType::NodeJs => {
            if metadata.linter.is_some() {
                for ext in ["js", "jsx", "ts", "tsx", "mjs", "cjs"] {
                    lint.insert(ext.to_string(), "npx eslint".to_string());
                }
            }
            metadata.has_tests.then(|| "npm test".to_string())
        }
        ProjectType::Python => {
            let command = match metadata.linter.as_deref() {
                Some("ruff") => "ruff check",
                _ => PYTHON_FATAL_LINT,
            };
            lint.insert("py".to_string(), command.to_string());
            metadata.has_tests.then(|| "python -m pytest".to_string())
        }
        ProjectType::Go => {
            lint.insert("go".to_string(), "gofmt -e -l".to_string());
            Some("go test ./...".to_string())
        }
        ProjectType::Unknown => None,
    };
    (lint, test)
}

/// Detect project type for a given path
pub fn detect_project_type(project_path: impl AsRef<Path>) -> CoreResult<ProjectDetectionResult> {
    ProjectDetector::new(project_path).detect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn create_temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_detect_rust_project() {
        let temp = create_temp_dir();
        let cargo_toml = r#"
[package]
name = "sample-crate"
version = "0.3.1"
edition = "2021"
"#;
        fs::write(temp.path().join("Cargo.toml"), cargo_toml).unwrap();

        let result = detect_project_type(temp.path()).unwrap();
        assert_eq!(result.project_type, ProjectType::Rust);
        assert_eq!(result.metadata.name.as_deref(), Some("sample-crate"));
        assert_eq!(result.test_command.as_deref(), Some("cargo test"));
        assert!(result.lint_commands.contains_key("rs"));
    }

    #[test]
    fn test_detect_python_with_ruff_and_tests() {
        let temp = create_temp_dir();
        fs::write(
            temp.path().join("pyproject.toml"),
            "[project]\nname = \"svc\"\n\n[tool.ruff]\nline-length = 100\n",
        )
        .unwrap();
        fs::create_dir(temp.path().join("tests")).unwrap();

        let result = detect_project_type(temp.path()).unwrap();
        assert_eq!(result.project_type, ProjectType::Python);
        assert_eq!(result.lint_commands["py"], "ruff check");
        assert_eq!(result.test_command.as_deref(), Some("python -m pytest"));
    }

    #[test]
    fn test_python_without_tests_gets_fatal_lint_only() {
        let temp = create_temp_dir();
        fs::write(temp.path().join("requirements.txt"), "requests\n").unwrap();

        let result = detect_project_type(temp.path()).unwrap();
        assert!(result.lint_commands["py"].contains("flake8"));
        assert!(result.test_command.is_none());
    }

    #[test]
    fn test_detect_node_project() {
        let temp = create_temp_dir();
        fs::write(
            temp.path().join("package.json"),
            r#"{"name":"web","scripts":{"test":"vitest"},"devDependencies":{"eslint":"9","vitest":"1"}}"#,
        )
        .unwrap();

        let result = detect_project_type(temp.path()).unwrap();
        assert_eq!(result.project_type, ProjectType::NodeJs);
        assert_eq!(result.metadata.test_framework.as_deref(), Some("vitest"));
        assert_eq!(result.lint_commands["ts"], "npx eslint");
        assert_eq!(result.test_command.as_deref(), Some("npm test"));
    }

    #[test]
    fn test_detect_unknown_project() {
        let temp = create_temp_dir();

        let result = detect_project_type(temp.path()).unwrap();
        assert_eq!(result.project_type, ProjectType::Unknown);
        assert!(result.marker_file.is_none());
        assert!(result.lint_commands.is_empty());
    }

    #[test]
    fn test_detect_go_project() {
        let temp = create_temp_dir();
        let go_mod = "module github.com/acme/tool\n\ngo 1.22\n";
        fs::write(temp.path().join("go.mod"), go_mod).unwrap();

        let result = detect_project_type(temp.path()).unwrap();
        assert_eq!(result.project_type, ProjectType::Go);
        assert_eq!(result.metadata.name.as_deref(), Some("github.com/acme/tool"));
    }

    #[test]
    fn test_broken_manifest_is_parse_error() {
        let temp = create_temp_dir();
        fs::write(temp.path().join("package.json"), "{ nope").unwrap();
        assert!(matches!(
            detect_project_type(temp.path()),
            Err(CoreError::Parse(_))
        ));
    }
}
