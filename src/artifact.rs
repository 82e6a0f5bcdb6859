//! Generated artifacts and entry-point discovery.
//!
//! An [`Artifact`] is one generated file inside a run workspace. The
//! validator, the test runner and the judges all read it; none of them
//! modify it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// Entry-point names tried in order for Python workspaces.
const PYTHON_ENTRY_POINTS: &[&str] = &["main.py", "app.py", "index.py", "run.py", "server.py"];

/// Entry-point names tried in order for HTML workspaces.
const HTML_ENTRY_POINTS: &[&str] = &["index.html", "main.html", "app.html"];

/// Directories never searched for artifacts.
const SKIPPED_DIRS: &[&str] = &["__pycache__", "node_modules", ".git", ".venv", "venv"];

/// The kind of program a case asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Html,
    Python,
}

impl ArtifactKind {
    /// File extension used by this kind, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Html => "html",
            ArtifactKind::Python => "py",
        }
    }

    fn entry_points(&self) -> &'static [&'static str] {
        match self {
            ArtifactKind::Html => HTML_ENTRY_POINTS,
            ArtifactKind::Python => PYTHON_ENTRY_POINTS,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Html => write!(f, "html"),
            ArtifactKind::Python => write!(f, "python"),
        }
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "html" | "web" => Ok(ArtifactKind::Html),
            "python" | "py" => Ok(ArtifactKind::Python),
            other => Err(format!("unknown artifact kind '{}'", other)),
        }
    }
}

/// One generated file plus its declared kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Absolute or workspace-joined path of the entry file.
    pub path: PathBuf,
    /// Declared kind.
    pub kind: ArtifactKind,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>, kind: ArtifactKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// File name of the entry point, for logs and prompts.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Read the artifact source as UTF-8, replacing invalid sequences.
    pub fn read_source(&self) -> std::io::Result<String> {
        let bytes = std::fs::read(&self.path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Locate the entry point of `kind` inside `workspace`.
///
/// Well-known names at the workspace root win, then the alphabetically first
/// root-level file, then the first nested file in path order. Returns `None`
/// when the model produced no file of that kind.
pub fn locate_entry_point(workspace: &Path, kind: ArtifactKind) -> Option<Artifact> {
    for name in kind.entry_points() {
        let candidate = workspace.join(name);
        if candidate.is_file() {
            return Some(Artifact::new(candidate, kind));
        }
    }

    let mut files = files_with_extension(workspace, kind.extension());
    files.sort_by(|a, b| {
        let depth_a = a.components().count();
        let depth_b = b.components().count();
        depth_a.cmp(&depth_b).then_with(|| a.cmp(b))
    });

    files
        .into_iter()
        .next()
        .map(|path| Artifact::new(path, kind))
}

/// Guess the artifact kind from whatever the workspace contains.
///
/// HTML wins when both kinds are present, since Python helpers next to a web
/// app are common while the reverse is not.
pub fn detect_kind(workspace: &Path) -> Option<ArtifactKind> {
    if !files_with_extension(workspace, "html").is_empty() {
        Some(ArtifactKind::Html)
    } else if !files_with_extension(workspace, "py").is_empty() {
        Some(ArtifactKind::Python)
    } else {
        None
    }
}

/// All files under `workspace` with the given extension, skipping hidden and
/// tooling directories.
pub fn files_with_extension(workspace: &Path, extension: &str) -> Vec<PathBuf> {
    WalkDir::new(workspace)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !is_skipped(entry.path(), workspace))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .map(|ext| ext.eq_ignore_ascii_case(extension))
                .unwrap_or(false)
        })
        .collect()
}

fn is_skipped(path: &Path, root: &Path) -> bool {
    if path == root {
        return false;
    }
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with('.') || SKIPPED_DIRS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_python_entry_point_priority() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.py"), "print('app')").unwrap();
        fs::write(dir.path().join("main.py"), "print('main')").unwrap();
        fs::write(dir.path().join("aaa.py"), "print('aaa')").unwrap();

        let artifact = locate_entry_point(dir.path(), ArtifactKind::Python).unwrap();
        assert_eq!(artifact.file_name(), "main.py");
        assert_eq!(artifact.kind, ArtifactKind::Python);
    }

    #[test]
    fn test_falls_back_to_first_root_file() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib").join("a.py"), "").unwrap();
        fs::write(dir.path().join("zeta.py"), "").unwrap();
        fs::write(dir.path().join("beta.py"), "").unwrap();

        let artifact = locate_entry_point(dir.path(), ArtifactKind::Python).unwrap();
        assert_eq!(artifact.file_name(), "beta.py");
    }

    #[test]
    fn test_nested_html_found() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("site")).unwrap();
        fs::write(dir.path().join("site").join("page.html"), "<html></html>").unwrap();

        let artifact = locate_entry_point(dir.path(), ArtifactKind::Html).unwrap();
        assert_eq!(artifact.file_name(), "page.html");
    }

    #[test]
    fn test_no_artifact() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), "nothing").unwrap();
        assert!(locate_entry_point(dir.path(), ArtifactKind::Python).is_none());
        assert!(detect_kind(dir.path()).is_none());
    }

    #[test]
    fn test_pycache_is_skipped() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("__pycache__")).unwrap();
        fs::write(dir.path().join("__pycache__").join("main.py"), "").unwrap();
        assert!(locate_entry_point(dir.path(), ArtifactKind::Python).is_none());
    }

    #[test]
    fn test_detect_kind_prefers_html() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
        fs::write(dir.path().join("serve.py"), "").unwrap();
        assert_eq!(detect_kind(dir.path()), Some(ArtifactKind::Html));
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("HTML".parse::<ArtifactKind>(), Ok(ArtifactKind::Html));
        assert_eq!("py".parse::<ArtifactKind>(), Ok(ArtifactKind::Python));
        assert!("rust".parse::<ArtifactKind>().is_err());
    }
}
