//! Static dependency guard.
//!
//! Runs before any untrusted code executes. Rejects package-manager
//! invocations and, for Python, imports that fall outside the standard
//! library or the workspace itself. Ambiguous constructs such as dynamic
//! import-by-string are rejected as well.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::artifact::{files_with_extension, Artifact, ArtifactKind};

/// Package-manager command fragments, matched case-insensitively.
pub const BLOCKED_COMMANDS: &[&str] = &[
    // Python
    "pip install",
    "pip3 install",
    "pip uninstall",
    "pip3 uninstall",
    "python -m pip",
    "python3 -m pip",
    "conda install",
    "conda create",
    "mamba install",
    "poetry add",
    "poetry install",
    "pipenv install",
    "pdm add",
    "uv pip",
    "uv add",
    "easy_install",
    // Node
    "npm install",
    "npm i ",
    "npm ci",
    "npm add",
    "yarn add",
    "yarn install",
    "pnpm install",
    "pnpm add",
    "bun install",
    "bun add",
    // System and other ecosystems
    "brew install",
    "apt install",
    "apt-get install",
    "yum install",
    "dnf install",
    "pacman -s",
    "cargo add",
    "cargo install",
    "go get",
    "go install",
    "gem install",
    "bundle install",
    "composer require",
    "composer install",
    "nuget install",
    "dotnet add package",
];

/// Fragments that read as ordinary English in UI text; only enforced on
/// command lines, not on source files.
const AMBIGUOUS_IN_SOURCE: &[&str] = &["go get", "go install", "npm i "];

/// Dynamic import constructs that defeat static import scanning.
const DYNAMIC_IMPORT_CALLS: &[&str] = &[
    "__import__(",
    "importlib.import_module(",
    "importlib.__import__(",
    "import_module(",
    "runpy.run_module(",
    "runpy.run_path(",
];

/// Python 3.11 standard-library top-level modules.
pub const STDLIB_MODULES: &[&str] = &[
    "__future__", "__main__", "_thread", "abc", "aifc", "argparse", "array", "ast",
    "asynchat", "asyncio", "asyncore", "atexit", "audioop", "base64", "bdb", "binascii",
    "binhex", "bisect", "builtins", "bz2", "calendar", "cgi", "cgitb", "chunk", "cmath",
    "cmd", "code", "codecs", "codeop", "collections", "colorsys", "compileall",
    "concurrent", "configparser", "contextlib", "contextvars", "copy", "copyreg",
    "cProfile", "crypt", "csv", "ctypes", "curses", "dataclasses", "datetime", "dbm",
    "decimal", "difflib", "dis", "distutils", "doctest", "email", "encodings", "enum",
    "errno", "faulthandler", "fcntl", "filecmp", "fileinput", "fnmatch", "fractions",
    "ftplib", "functools", "gc", "getopt", "getpass", "gettext", "glob", "graphlib",
    "grp", "gzip", "hashlib", "heapq", "hmac", "html", "http", "idlelib", "imaplib",
    "imghdr", "imp", "importlib", "inspect", "io", "ipaddress", "itertools", "json",
    "keyword", "lib2to3", "linecache", "locale", "logging", "lzma", "mailbox", "mailcap",
    "marshal", "math", "mimetypes", "mmap", "modulefinder", "multiprocessing", "netrc",
    "nis", "nntplib", "numbers", "operator", "optparse", "os", "ossaudiodev", "pathlib",
    "pdb", "pickle", "pickletools", "pipes", "pkgutil", "platform", "plistlib", "poplib",
    "posix", "posixpath", "pprint", "profile", "pstats", "pty", "pwd", "py_compile",
    "pyclbr", "pydoc", "queue", "quopri", "random", "re", "readline", "reprlib",
    "resource", "rlcompleter", "runpy", "sched", "secrets", "select", "selectors",
    "shelve", "shlex", "shutil", "signal", "site", "smtpd", "smtplib", "sndhdr", "socket",
    "socketserver", "spwd", "sqlite3", "ssl", "stat", "statistics", "string",
    "stringprep", "struct", "subprocess", "sunau", "symtable", "sys", "sysconfig",
    "syslog", "tabnanny", "tarfile", "telnetlib", "tempfile", "termios", "test",
    "textwrap", "threading", "time", "timeit", "tkinter", "token", "tokenize", "tomllib",
    "trace", "traceback", "tracemalloc", "tty", "turtle", "turtledemo", "types", "typing",
    "typing_extensions", "unicodedata", "unittest", "urllib", "uu", "uuid", "venv",
    "warnings", "wave", "weakref", "webbrowser", "winreg", "winsound", "wsgiref",
    "xdrlib", "xml", "xmlrpc", "zipapp", "zipfile", "zipimport", "zlib", "zoneinfo",
];

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*import\s+([A-Za-z_][\w\.]*(?:\s+as\s+\w+)?(?:\s*,\s*[A-Za-z_][\w\.]*(?:\s+as\s+\w+)?)*)")
        .expect("Invalid import regex")
});

static FROM_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*from\s+(\.*)([A-Za-z_][\w\.]*)?\s+import\b").expect("Invalid from-import regex")
});

/// Package manager and subcommand passed as separate argv items, as in
/// `subprocess.run(["npm", "install", "x"])` or `[sys.executable, "-m", "pip", "install"]`.
static ARGV_INSTALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)['"](pip3?|npm|yarn|pnpm|bun|conda|mamba|poetry|pipenv|pdm|uv|apt|apt-get|yum|dnf|brew|gem|bundle|cargo|go|composer|easy_install)['"]\s*,\s*(?:['"][^'"\n]*['"]\s*,\s*)*?['"](install|add|i|ci|require|get|sync)['"]"#,
    )
    .expect("Invalid argv install regex")
});

/// `-m pip` as separate argv items.
static ARGV_PIP_MODULE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"]-m['"]\s*,\s*['"](pip|ensurepip)['"]"#).expect("Invalid argv pip regex")
});

static EXEC_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:exec|eval|compile)\s*\([^\n]*\bimport\b").expect("Invalid exec regex")
});

/// Result of a guard check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardVerdict {
    Allowed,
    Blocked { reason: String },
}

impl GuardVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardVerdict::Allowed)
    }

    fn blocked(reason: impl Into<String>) -> Self {
        GuardVerdict::Blocked {
            reason: reason.into(),
        }
    }
}

/// Static dependency guard with a fixed stdlib allowlist.
#[derive(Debug, Clone)]
pub struct DependencyGuard {
    allowlist: HashSet<String>,
}

impl Default for DependencyGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGuard {
    /// Guard allowing exactly the Python standard library.
    pub fn new() -> Self {
        Self {
            allowlist: STDLIB_MODULES.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// Check a shell command line before it is handed to the executor.
    pub fn check_command(&self, command: &str) -> GuardVerdict {
        let lowered = normalize_whitespace(&command.to_lowercase());
        for pattern in BLOCKED_COMMANDS {
            let at_end = pattern.ends_with(' ') && lowered.ends_with(pattern.trim_end());
            if lowered.contains(pattern) || at_end {
                return GuardVerdict::blocked(format!(
                    "package manager command '{}' is not allowed",
                    pattern.trim()
                ));
            }
        }
        GuardVerdict::Allowed
    }

    /// Check source text of the given kind.
    ///
    /// `local_modules` names importable modules that live in the workspace.
    pub fn check_source(
        &self,
        source: &str,
        kind: ArtifactKind,
        local_modules: &HashSet<String>,
    ) -> GuardVerdict {
        if let Some(pattern) = find_package_manager(source, kind) {
            return GuardVerdict::blocked(format!(
                "package manager invocation '{}' found in source",
                pattern
            ));
        }

        if kind == ArtifactKind::Python {
            if let Some(construct) = find_dynamic_import(source) {
                return GuardVerdict::blocked(format!(
                    "dynamic import construct '{}' is not allowed",
                    construct
                ));
            }

            let illegal = self.illegal_imports(source, local_modules);
            if !illegal.is_empty() {
                return GuardVerdict::blocked(format!(
                    "non-stdlib imports: {}",
                    illegal.join(", ")
                ));
            }
        }

        GuardVerdict::Allowed
    }

    /// Check every relevant file of the workspace holding `artifact`.
    ///
    /// Python workspaces have every `.py` file scanned, since the entry point
    /// may import a sibling module that pulls in a third-party package.
    pub fn check_workspace(
        &self,
        workspace: &Path,
        artifact: &Artifact,
    ) -> std::io::Result<GuardVerdict> {
        let files: Vec<PathBuf> = match artifact.kind {
            ArtifactKind::Python => files_with_extension(workspace, "py"),
            ArtifactKind::Html => vec![artifact.path.clone()],
        };
        let local_modules = local_python_modules(workspace);

        for file in files {
            let bytes = std::fs::read(&file)?;
            let source = String::from_utf8_lossy(&bytes);
            let verdict = self.check_source(&source, artifact.kind, &local_modules);
            if let GuardVerdict::Blocked { reason } = verdict {
                let name = file
                    .strip_prefix(workspace)
                    .unwrap_or(&file)
                    .display()
                    .to_string();
                debug!(file = %name, reason = %reason, "Dependency guard blocked file");
                return Ok(GuardVerdict::blocked(format!("{}: {}", name, reason)));
            }
        }

        Ok(GuardVerdict::Allowed)
    }

    /// Top-level imported modules not covered by the allowlist, sorted.
    pub fn illegal_imports(&self, source: &str, local_modules: &HashSet<String>) -> Vec<String> {
        let mut illegal: Vec<String> = extract_imports(source)
            .into_iter()
            .filter(|m| !self.allowlist.contains(m) && !local_modules.contains(m))
            .collect();
        illegal.sort();
        illegal.dedup();
        illegal
    }
}

/// Top-level modules imported by absolute import statements.
///
/// Relative imports are skipped since they always resolve inside the
/// workspace.
pub fn extract_imports(source: &str) -> Vec<String> {
    let mut modules = Vec::new();

    for line in source.lines() {
        // `import a; import b` on one line
        for statement in line.split(';') {
            if let Some(caps) = IMPORT_RE.captures(statement) {
                for item in caps[1].split(',') {
                    let name = item.split_whitespace().next().unwrap_or("");
                    if let Some(top) = name.split('.').next().filter(|t| !t.is_empty()) {
                        modules.push(top.to_string());
                    }
                }
            } else if let Some(caps) = FROM_IMPORT_RE.captures(statement) {
                let relative = caps.get(1).map(|m| !m.as_str().is_empty()).unwrap_or(false);
                if relative {
                    continue;
                }
                if let Some(module) = caps.get(2) {
                    if let Some(top) = module.as_str().split('.').next() {
                        modules.push(top.to_string());
                    }
                }
            }
        }
    }

    modules
}

/// Names importable from the workspace: root-level `.py` stems and package dirs.
pub fn local_python_modules(workspace: &Path) -> HashSet<String> {
    let mut modules = HashSet::new();
    let Ok(entries) = std::fs::read_dir(workspace) else {
        return modules;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && path.extension().map(|e| e == "py").unwrap_or(false) {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                modules.insert(stem.to_string());
            }
        } else if path.is_dir() {
            if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
                if !name.starts_with('.') && name != "__pycache__" {
                    modules.insert(name.to_string());
                }
            }
        }
    }
    modules
}

fn find_package_manager(source: &str, kind: ArtifactKind) -> Option<String> {
    let lowered = normalize_whitespace(&source.to_lowercase());
    if let Some(pattern) = BLOCKED_COMMANDS
        .iter()
        .filter(|p| !AMBIGUOUS_IN_SOURCE.contains(p))
        .find(|p| lowered.contains(*p))
    {
        return Some(pattern.trim().to_string());
    }
    // JS arrays of words in a page are not process launches.
    if kind != ArtifactKind::Python {
        return None;
    }
    if let Some(caps) = ARGV_INSTALL_RE.captures(source) {
        return Some(format!("{} {}", &caps[1], &caps[2]).to_lowercase());
    }
    ARGV_PIP_MODULE_RE
        .captures(source)
        .map(|caps| format!("-m {}", &caps[1]))
}

fn find_dynamic_import(source: &str) -> Option<String> {
    for code in source.lines() {
        if code.trim_start().starts_with('#') {
            continue;
        }
        for call in DYNAMIC_IMPORT_CALLS {
            if code.contains(call) {
                return Some(call.trim_end_matches('(').to_string());
            }
        }
        if let Some(m) = EXEC_IMPORT_RE.find(code) {
            return Some(m.as_str().split('(').next().unwrap_or("exec").trim().to_string());
        }
    }
    None
}

fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(c);
            last_space = false;
        }
    }
    out
}
