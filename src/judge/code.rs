//! Collecting workspace source files for judge prompts.

use std::path::Path;

use serde::{Deserialize, Serialize};
use walkdir::{DirEntry, WalkDir};

use crate::utils::truncate;

/// Extensions shown to judges.
const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "html", "css", "json", "yaml", "yml", "toml", "md", "txt",
    "sh", "bash", "sql", "go", "rs", "java",
];

const SKIPPED_DIRS: &[&str] = &["__pycache__", "node_modules"];

/// A workspace file as shown to a judge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeFile {
    /// Path relative to the workspace, with `/` separators.
    pub path: String,
    pub content: String,
}

fn is_skipped(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

fn has_code_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| CODE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Collect up to `max_files` code files under `workspace` in path order,
/// each truncated to `max_chars` characters. Unreadable or non-UTF-8 files
/// are skipped.
pub fn collect_code_files(workspace: &Path, max_files: usize, max_chars: usize) -> Vec<CodeFile> {
    let mut paths: Vec<_> = WalkDir::new(workspace)
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && has_code_extension(e.path()))
        .map(|e| e.into_path())
        .collect();
    paths.sort();

    let mut files = Vec::new();
    for path in paths {
        if files.len() >= max_files {
            break;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            tracing::debug!(path = %path.display(), "Skipping unreadable file");
            continue;
        };
        let relative = path
            .strip_prefix(workspace)
            .unwrap_or(&path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.push(CodeFile {
            path: relative,
            content: truncate(&content, max_chars),
        });
    }
    files
}

/// Render files as markdown sections for a prompt.
pub fn format_code_files(files: &[CodeFile]) -> String {
    files
        .iter()
        .map(|f| format!("### {}\n```\n{}\n```", f.path, f.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}
