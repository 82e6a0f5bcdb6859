//! Execution verdict types.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Maximum size of the stdout/stderr excerpt kept on a verdict.
pub const EXCERPT_LIMIT: usize = 2000;

/// Outcome of running an artifact once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictStatus {
    Clean,
    RuntimeError,
    Timeout,
    BlockedDependency,
    NoArtifact,
}

impl VerdictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictStatus::Clean => "CLEAN",
            VerdictStatus::RuntimeError => "RUNTIME_ERROR",
            VerdictStatus::Timeout => "TIMEOUT",
            VerdictStatus::BlockedDependency => "BLOCKED_DEPENDENCY",
            VerdictStatus::NoArtifact => "NO_ARTIFACT",
        }
    }
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single execution verdict produced for a RunTarget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionVerdict {
    pub status: VerdictStatus,
    /// Tail of stderr (or stdout when stderr is empty).
    #[serde(default)]
    pub excerpt: String,
    /// One-line explanation, e.g. the missing module or the blocking rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Non-fatal observations on a CLEAN run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl ExecutionVerdict {
    fn with_status(status: VerdictStatus) -> Self {
        Self {
            status,
            excerpt: String::new(),
            detail: None,
            warnings: Vec::new(),
            exit_code: None,
            duration_ms: 0,
        }
    }

    pub fn clean() -> Self {
        Self::with_status(VerdictStatus::Clean)
    }

    pub fn runtime_error(detail: impl Into<String>) -> Self {
        Self::with_status(VerdictStatus::RuntimeError).with_detail(detail)
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::with_status(VerdictStatus::Timeout).with_detail(detail)
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self::with_status(VerdictStatus::BlockedDependency).with_detail(reason)
    }

    pub fn no_artifact() -> Self {
        Self::with_status(VerdictStatus::NoArtifact)
            .with_detail("no Python or HTML file found in workspace")
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.excerpt = excerpt.into();
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn is_clean(&self) -> bool {
        self.status == VerdictStatus::Clean
    }

    /// CLEAN, but with warnings attached.
    pub fn has_warnings(&self) -> bool {
        self.is_clean() && !self.warnings.is_empty()
    }
}
