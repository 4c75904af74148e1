//! Cross-Platform Path Utilities
//!
//! Resolves the application directory (~/.editflow/) and the files in it,
//! plus the relative-path normalization the edit engine relies on.

use std::path::{Component, Path, PathBuf};

use crate::utils::error::{AppError, AppResult};

/// Get the user's home directory
pub fn home_dir() -> AppResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| AppError::config("Could not determine home directory"))
}

/// Get the editflow directory (~/.editflow/)
pub fn editflow_dir() -> AppResult<PathBuf> {
    Ok(home_dir()?.join(".editflow"))
}

/// Get the config file path (~/.editflow/config.json)
pub fn config_path() -> AppResult<PathBuf> {
    Ok(editflow_dir()?.join("config.json"))
}

/// Get the default MCP server list path (~/.editflow/mcp.json)
pub fn mcp_config_path() -> AppResult<PathBuf> {
    Ok(editflow_dir()?.join("mcp.json"))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> AppResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Normalize a repo-relative path lexically.
///
/// Returns `None` for absolute paths and for paths that climb above the
/// root. Separators are normalized to `/`.
pub fn normalize_relative(path: &str) -> Option<String> {
    let candidate = Path::new(path);
    let mut parts: Vec<String> = Vec::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
