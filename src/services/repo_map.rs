//! Repository Map
//!
//! A short listing of repository files outside the chat, so the model knows
//! what exists and can ask for files to be added.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tracing::debug;

/// Produces the repository summary segment
pub trait RepoMap: Send + Sync {
    /// Summarize the repository, leaving out `chat_files`.
    fn summarize(&self, chat_files: &[String]) -> String;
}

/// Gitignore-aware listing of source files, sorted and capped
#[derive(Debug, Clone)]
pub struct FileListRepoMap {
    root: PathBuf,
    max_files: usize,
}

impl FileListRepoMap {
    pub fn new(root: impl Into<PathBuf>, max_files: usize) -> Self {
        Self {
            root: root.into(),
            max_files,
        }
    }

    fn collect(&self) -> Vec<String> {
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(true)
            .follow_links(false)
            .git_ignore(true)
            .git_exclude(true)
            .git_global(true)
            .require_git(false);

        let mut files = Vec::new();
        for entry in builder.build() {
            let Ok(entry) = entry else {
                continue;
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            if is_binary_name(rel) {
                continue;
            }
            let rel = rel.to_string_lossy().replace('\\', "/");
            if !rel.is_empty() {
                files.push(rel);
            }
        }
        files.sort();
        files
    }
}

impl RepoMap for FileListRepoMap {
    fn summarize(&self, chat_files: &[String]) -> String {
        let excluded: HashSet<&str> = chat_files.iter().map(String::as_str).collect();
        let files: Vec<String> = self
            .collect()
            .into_iter()
            .filter(|f| !excluded.contains(f.as_str()))
            .collect();

        let total = files.len();
        let mut out = files
            .iter()
            .take(self.max_files)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        if total > self.max_files {
            out.push_str(&format!("\n... and {} more files", total - self.max_files));
        }
        debug!(total, shown = total.min(self.max_files), "repo map built");
        out
    }
}

fn is_binary_name(path: &Path) -> bool {
    const BINARY: &[&str] = &[
        "png", "jpg", "jpeg", "gif", "webp", "ico", "pdf", "zip", "gz", "tar", "so", "dylib",
        "dll", "exe", "o", "a", "class", "jar", "wasm", "lock",
    ];
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| BINARY.contains(&e.to_ascii_lowercase().as_str()))
}
