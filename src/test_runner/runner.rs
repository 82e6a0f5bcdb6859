//! Functional test execution.
//!
//! Every test runs in its own harness process: a fresh browser page for HTML
//! artifacts, a fresh interpreter for Python ones. A crash, exception or
//! timeout fails that test only.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::suite::TestSuite;
use crate::artifact::{Artifact, ArtifactKind};
use crate::config::{SandboxSettings, TimeoutProfile};
use crate::sandbox::{
    CommandSpec, DependencyGuard, Liveness, ProbeSpec, ProbeState, RunningProcess, SandboxExecutor,
};
use crate::utils::{tail_excerpt, truncate};
use crate::validation::python::extract_port;
use crate::validation::{BrowserPool, ExecutionVerdict};

const HARNESS: &str = include_str!("harness.py");
const RESULT_MARKER: &str = "@@VIBE_RESULT@@";
const UNAVAILABLE_EXIT: i32 = 3;
const ERROR_LIMIT: usize = 200;

/// Environment variable carrying the shared server's port into tests.
pub const SERVER_PORT_ENV: &str = "VIBE_EVAL_SERVER_PORT";

/// One test's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl TestCaseResult {
    pub fn pass(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            passed: true,
            error: None,
            duration_ms: millis(duration),
        }
    }

    pub fn fail(name: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
        let error: String = error.into();
        Self {
            name: name.into(),
            passed: false,
            error: Some(truncate(&error, ERROR_LIMIT)),
            duration_ms: millis(duration),
        }
    }
}

/// Results of a suite that exists. A missing suite is `None`, never an empty
/// result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub tests: Vec<TestCaseResult>,
    pub passed: usize,
    pub total: usize,
    /// passed / total, in [0, 1].
    pub pass_rate: f64,
}

impl TestResult {
    pub fn from_cases(tests: Vec<TestCaseResult>) -> Self {
        let total = tests.len();
        let passed = tests.iter().filter(|t| t.passed).count();
        let pass_rate = if total == 0 {
            0.0
        } else {
            passed as f64 / total as f64
        };
        Self {
            tests,
            passed,
            total,
            pass_rate,
        }
    }

    /// Every test recorded as failed without running.
    pub fn not_run(names: &[String], reason: &str) -> Self {
        Self::from_cases(
            names
                .iter()
                .map(|name| TestCaseResult::fail(name, reason, Duration::ZERO))
                .collect(),
        )
    }

    pub fn failed(&self) -> usize {
        self.total - self.passed
    }
}

#[derive(Debug, Deserialize)]
struct HarnessReport {
    passed: bool,
    #[serde(default)]
    error: Option<String>,
}

enum HarnessRun {
    Finished(TestCaseResult),
    BrowserUnavailable,
}

/// Runs case test suites against artifacts.
#[derive(Debug, Clone)]
pub struct FunctionalTestRunner {
    executor: SandboxExecutor,
    browsers: BrowserPool,
    settings: SandboxSettings,
}

impl FunctionalTestRunner {
    pub fn new(settings: SandboxSettings) -> Self {
        let browsers = BrowserPool::new(settings.browser_slots);
        Self::with_browser_pool(settings, browsers)
    }

    /// Runner whose browser tests draw from `browsers`, usually the pool the
    /// execution validator loads pages with.
    pub fn with_browser_pool(settings: SandboxSettings, browsers: BrowserPool) -> Self {
        Self {
            executor: SandboxExecutor::new(settings.max_output_bytes)
                .with_guard(DependencyGuard::new()),
            browsers,
            settings,
        }
    }

    /// Run `suite` against `artifact`.
    ///
    /// Returns `None` when there is nothing to score: no suite, a suite with
    /// zero tests, or browser tests on a host without a browser. Tests never
    /// run against code whose verdict is not CLEAN; they are recorded failed.
    pub async fn run(
        &self,
        suite: Option<&TestSuite>,
        artifact: Option<&Artifact>,
        workspace: &Path,
        verdict: &ExecutionVerdict,
        profile: TimeoutProfile,
    ) -> Option<TestResult> {
        let suite = suite?;
        let names = suite.select(profile);
        if names.is_empty() {
            warn!(suite = %suite.path.display(), "Test suite has no tests; treating as absent");
            return None;
        }

        let artifact = match artifact {
            Some(artifact) if verdict.is_clean() => artifact,
            _ => {
                let reason = format!("not run: execution verdict {}", verdict.status);
                return Some(TestResult::not_run(&names, &reason));
            }
        };

        let scratch = match self.write_harness() {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "Could not write test harness");
                return Some(TestResult::not_run(&names, &format!("harness unavailable: {}", e)));
            }
        };
        let harness = scratch.path().join("harness.py");

        let result = if suite.shared_server && artifact.kind == ArtifactKind::Python {
            self.run_against_server(suite, &names, artifact, workspace, &harness)
                .await
        } else {
            self.run_each(suite, &names, artifact, workspace, &harness, None)
                .await
        };

        if let Some(result) = &result {
            info!(
                suite = %suite.path.display(),
                passed = result.passed,
                total = result.total,
                "Functional tests finished"
            );
        }
        result
    }

    fn write_harness(&self) -> std::io::Result<TempDir> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("harness.py"), HARNESS)?;
        Ok(dir)
    }

    async fn run_each(
        &self,
        suite: &TestSuite,
        names: &[String],
        artifact: &Artifact,
        workspace: &Path,
        harness: &Path,
        server_port: Option<u16>,
    ) -> Option<TestResult> {
        let mut cases = Vec::with_capacity(names.len());
        for name in names {
            match self
                .run_one(suite, name, artifact, workspace, harness, server_port)
                .await
            {
                HarnessRun::Finished(case) => cases.push(case),
                HarnessRun::BrowserUnavailable => {
                    warn!(suite = %suite.path.display(), "Browser unavailable; browser tests treated as absent");
                    return None;
                }
            }
        }
        Some(TestResult::from_cases(cases))
    }

    async fn run_one(
        &self,
        suite: &TestSuite,
        name: &str,
        artifact: &Artifact,
        workspace: &Path,
        harness: &Path,
        server_port: Option<u16>,
    ) -> HarnessRun {
        let mut spec = CommandSpec::new(&self.settings.python_bin, workspace)
            .arg(harness.to_string_lossy())
            .arg(suite.path.to_string_lossy())
            .arg(name)
            .arg(artifact.kind.to_string())
            .arg(workspace.to_string_lossy())
            .arg(artifact.path.to_string_lossy())
            .arg(self.settings.page_load_timeout_ms.to_string())
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .timeout(self.settings.test_timeout());
        if let Some(port) = server_port {
            spec = spec.env(SERVER_PORT_ENV, port.to_string());
        }

        // Each browser test launches its own Chromium.
        let _permit = match artifact.kind {
            ArtifactKind::Html => match self.browsers.acquire().await {
                Ok(permit) => Some(permit),
                Err(e) => {
                    return HarnessRun::Finished(TestCaseResult::fail(
                        name,
                        e.to_string(),
                        Duration::ZERO,
                    ))
                }
            },
            ArtifactKind::Python => None,
        };

        let started = Instant::now();
        let outcome = match self.executor.run(&spec).await {
            Ok(outcome) => outcome,
            Err(e) => {
                return HarnessRun::Finished(TestCaseResult::fail(
                    name,
                    format!("harness failed to start: {}", e),
                    started.elapsed(),
                ))
            }
        };
        let elapsed = started.elapsed();

        if outcome.timed_out {
            return HarnessRun::Finished(TestCaseResult::fail(
                name,
                format!("timed out after {}s", spec.timeout.as_secs()),
                elapsed,
            ));
        }
        if artifact.kind == ArtifactKind::Html && outcome.exit_code == Some(UNAVAILABLE_EXIT) {
            return HarnessRun::BrowserUnavailable;
        }

        let case = match parse_harness_report(&outcome.stdout) {
            Some(report) if report.passed => TestCaseResult::pass(name, elapsed),
            Some(report) => TestCaseResult::fail(
                name,
                report.error.unwrap_or_else(|| "failed".to_string()),
                elapsed,
            ),
            None => TestCaseResult::fail(
                name,
                format!(
                    "harness crashed (exit {:?}): {}",
                    outcome.exit_code,
                    tail_excerpt(&outcome.stderr, ERROR_LIMIT)
                ),
                elapsed,
            ),
        };
        debug!(test = %name, passed = case.passed, "Test finished");
        HarnessRun::Finished(case)
    }

    /// Start the artifact once, run the tests sequentially against it, then
    /// stop it.
    async fn run_against_server(
        &self,
        suite: &TestSuite,
        names: &[String],
        artifact: &Artifact,
        workspace: &Path,
        harness: &Path,
    ) -> Option<TestResult> {
        let port = artifact.read_source().ok().and_then(|s| extract_port(&s));
        let liveness = match port {
            Some(port) => Liveness::Port {
                host: "127.0.0.1".to_string(),
                port,
            },
            None => Liveness::GracePeriod(self.settings.probe_grace()),
        };
        let probe = ProbeSpec {
            liveness,
            bound: self.settings.probe_bound(),
            poll_interval: self.settings.probe_poll(),
        };

        let spec = CommandSpec::new(&self.settings.python_bin, workspace)
            .arg(artifact.path.to_string_lossy())
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONDONTWRITEBYTECODE", "1");

        let mut server: RunningProcess = match self.executor.start(&spec) {
            Ok(process) => process,
            Err(e) => {
                return Some(TestResult::not_run(
                    names,
                    &format!("shared server failed to start: {}", e),
                ))
            }
        };

        let state = server.wait_until_live(&probe).await;
        if !matches!(state, Ok(ProbeState::Live)) {
            let outcome = server.terminate().await;
            let reason = format!(
                "shared server never became live ({:?}): {}",
                state.ok(),
                tail_excerpt(&outcome.stderr, 120)
            );
            return Some(TestResult::not_run(names, &reason));
        }

        let result = self
            .run_each(suite, names, artifact, workspace, harness, port)
            .await;
        server.terminate().await;
        result
    }
}

fn parse_harness_report(stdout: &str) -> Option<HarnessReport> {
    stdout
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix(RESULT_MARKER))
        .and_then(|json| serde_json::from_str(json).ok())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
