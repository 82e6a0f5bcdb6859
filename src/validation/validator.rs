//! The execution validator.
//!
//! Produces exactly one [`ExecutionVerdict`] per RunTarget. The dependency
//! guard runs first; a blocked workspace is never executed.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::browser::{structural_check, BrowserDriver, BrowserPool, PageReport, PlaywrightDriver};
use super::python::PythonValidator;
use super::verdict::ExecutionVerdict;
use crate::artifact::{Artifact, ArtifactKind};
use crate::config::{SandboxSettings, TimeoutProfile};
use crate::error::{BrowserError, SandboxError};
use crate::sandbox::{DependencyGuard, GuardVerdict, SandboxExecutor};

/// Warning attached when HTML could only be checked structurally.
pub const STRUCTURAL_ONLY_WARNING: &str = "browser unavailable; structural check only";

/// Classifies artifacts as CLEAN, RUNTIME_ERROR, TIMEOUT, BLOCKED_DEPENDENCY
/// or NO_ARTIFACT.
#[derive(Clone)]
pub struct ExecutionValidator {
    guard: DependencyGuard,
    python: PythonValidator,
    browser: Arc<dyn BrowserDriver>,
    settings: SandboxSettings,
}

impl ExecutionValidator {
    /// Validator backed by the sandbox executor and a Playwright driver.
    pub fn new(settings: SandboxSettings) -> Self {
        let browsers = BrowserPool::new(settings.browser_slots);
        Self::with_browser_pool(settings, browsers)
    }

    /// Validator whose page loads draw from `browsers`.
    pub fn with_browser_pool(settings: SandboxSettings, browsers: BrowserPool) -> Self {
        let executor =
            SandboxExecutor::new(settings.max_output_bytes).with_guard(DependencyGuard::new());
        let browser = Arc::new(PlaywrightDriver::new(
            executor.clone(),
            settings.python_bin.clone(),
            browsers,
        ));
        Self {
            guard: DependencyGuard::new(),
            python: PythonValidator::new(executor, settings.clone()),
            browser,
            settings,
        }
    }

    /// Swap the browser driver.
    pub fn with_browser(mut self, browser: Arc<dyn BrowserDriver>) -> Self {
        self.browser = browser;
        self
    }

    /// Validate the artifact found in `workspace`. `None` means the model
    /// produced nothing runnable.
    pub async fn validate(
        &self,
        workspace: &Path,
        artifact: Option<&Artifact>,
        profile: TimeoutProfile,
    ) -> ExecutionVerdict {
        let Some(artifact) = artifact else {
            info!(workspace = %workspace.display(), "No artifact found");
            return ExecutionVerdict::no_artifact();
        };

        let started = Instant::now();

        match self.guard.check_workspace(workspace, artifact) {
            Ok(GuardVerdict::Allowed) => {}
            Ok(GuardVerdict::Blocked { reason }) => {
                info!(artifact = %artifact.file_name(), reason = %reason, "Dependency guard blocked artifact");
                return ExecutionVerdict::blocked(reason).with_duration(started.elapsed());
            }
            Err(e) => {
                warn!(artifact = %artifact.file_name(), error = %e, "Could not scan workspace");
                return ExecutionVerdict::runtime_error(format!("unreadable workspace: {}", e))
                    .with_duration(started.elapsed());
            }
        }

        let verdict = match artifact.kind {
            ArtifactKind::Python => self.python.validate(artifact, workspace, profile).await,
            ArtifactKind::Html => self.validate_html(artifact).await,
        };

        debug!(
            artifact = %artifact.file_name(),
            status = %verdict.status,
            duration_ms = verdict.duration_ms,
            "Execution verdict"
        );
        verdict
    }

    async fn validate_html(&self, artifact: &Artifact) -> ExecutionVerdict {
        let started = Instant::now();
        let loaded = self
            .browser
            .load(
                &artifact.path,
                self.settings.settle_window(),
                self.settings.page_load_timeout(),
            )
            .await;

        match loaded {
            Ok(report) => classify_page(&report).with_duration(started.elapsed()),
            Err(BrowserError::Unavailable(reason))
            | Err(BrowserError::Sandbox(SandboxError::Spawn { program: reason, .. })) => {
                warn!(reason = %reason, "Browser unavailable, falling back to structural check");
                self.structural_fallback(artifact).with_duration(started.elapsed())
            }
            Err(e) => ExecutionVerdict::runtime_error(format!("browser validation error: {}", e))
                .with_duration(started.elapsed()),
        }
    }

    fn structural_fallback(&self, artifact: &Artifact) -> ExecutionVerdict {
        let source = match artifact.read_source() {
            Ok(source) => source,
            Err(e) => return ExecutionVerdict::runtime_error(format!("unreadable artifact: {}", e)),
        };
        match structural_check(&source) {
            Ok(()) => ExecutionVerdict::clean().with_warning(STRUCTURAL_ONLY_WARNING),
            Err(missing) => ExecutionVerdict::runtime_error(missing.join(", "))
                .with_warning(STRUCTURAL_ONLY_WARNING),
        }
    }
}

/// CLEAN iff loaded with no uncaught script errors. Failed resource loads are
/// warnings.
pub fn classify_page(report: &PageReport) -> ExecutionVerdict {
    let errors = report.script_errors();

    let mut verdict = if !errors.is_empty() {
        ExecutionVerdict::runtime_error(errors[0].clone()).with_excerpt(errors.join("\n"))
    } else if !report.loaded {
        let reason = report
            .load_error
            .clone()
            .unwrap_or_else(|| "page did not reach the load state".to_string());
        ExecutionVerdict::timeout(reason)
    } else {
        ExecutionVerdict::clean()
    };

    for failure in report.resource_failures() {
        verdict = verdict.with_warning(format!("failed resource load: {}", failure));
    }
    verdict
}
