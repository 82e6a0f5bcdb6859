//! Python script validation.
//!
//! A script is syntax-checked first, then either run to completion or, when
//! it looks like a server, started in probe mode and stopped once live.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use super::verdict::{ExecutionVerdict, EXCERPT_LIMIT};
use crate::artifact::Artifact;
use crate::config::{SandboxSettings, TimeoutProfile};
use crate::sandbox::{
    CommandSpec, ExecutionOutcome, Liveness, ProbeSpec, ProbeState, SandboxExecutor,
};
use crate::utils::tail_excerpt;

/// Source markers of a script that serves forever.
const SERVER_MARKERS: &[&str] = &[
    "serve_forever(",
    "HTTPServer(",
    "socketserver.",
    "app.run(",
    "uvicorn.run(",
    ".listen(",
];

const TRACEBACK_MARKER: &str = "Traceback (most recent call last)";

const SYNTAX_CHECK: &str =
    "import ast,sys; ast.parse(open(sys.argv[1], encoding='utf-8').read(), sys.argv[1])";

static PORT_ASSIGN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bport\s*=\s*(\d{2,5})\b").expect("Invalid port regex")
});

static ADDRESS_TUPLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\(\s*['"][^'"\n]*['"]\s*,\s*(\d{2,5})\s*\)"#).expect("Invalid address regex")
});

static MISSING_MODULE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*((?:ModuleNotFoundError|ImportError):.*)$")
        .expect("Invalid missing-module regex")
});

/// True when the source starts a long-running server.
pub fn is_server_script(source: &str) -> bool {
    SERVER_MARKERS.iter().any(|marker| source.contains(marker))
}

/// The port a server script listens on, if it is written literally.
pub fn extract_port(source: &str) -> Option<u16> {
    PORT_ASSIGN_RE
        .captures_iter(source)
        .chain(ADDRESS_TUPLE_RE.captures_iter(source))
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u16>().ok())
        .find(|port| *port > 0)
}

/// The `ModuleNotFoundError`/`ImportError` line from a traceback.
pub fn missing_module(stderr: &str) -> Option<String> {
    MISSING_MODULE_RE
        .captures(stderr)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Classify a finished run.
///
/// CLEAN requires exit code 0 and no traceback on stderr.
pub fn classify_outcome(outcome: &ExecutionOutcome, timeout: Duration) -> ExecutionVerdict {
    let excerpt = if outcome.stderr.trim().is_empty() {
        tail_excerpt(&outcome.stdout, EXCERPT_LIMIT)
    } else {
        tail_excerpt(&outcome.stderr, EXCERPT_LIMIT)
    };

    let verdict = if outcome.timed_out {
        ExecutionVerdict::timeout(format!("timed out after {}s", timeout.as_secs()))
    } else if outcome.exit_code != Some(0) {
        let detail = missing_module(&outcome.stderr).unwrap_or_else(|| match outcome.exit_code {
            Some(code) => format!("exited with code {}", code),
            None => "killed by signal".to_string(),
        });
        ExecutionVerdict::runtime_error(detail)
    } else if outcome.stderr.contains(TRACEBACK_MARKER) {
        let detail = missing_module(&outcome.stderr)
            .unwrap_or_else(|| "uncaught exception traceback on stderr".to_string());
        ExecutionVerdict::runtime_error(detail)
    } else {
        ExecutionVerdict::clean()
    };

    verdict
        .with_excerpt(excerpt)
        .with_exit_code(outcome.exit_code)
        .with_duration(outcome.duration)
}

/// Runs Python artifacts through the sandbox.
#[derive(Debug, Clone)]
pub struct PythonValidator {
    executor: SandboxExecutor,
    settings: SandboxSettings,
}

impl PythonValidator {
    pub fn new(executor: SandboxExecutor, settings: SandboxSettings) -> Self {
        Self { executor, settings }
    }

    fn command(&self, workspace: &Path) -> CommandSpec {
        CommandSpec::new(&self.settings.python_bin, workspace)
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONDONTWRITEBYTECODE", "1")
    }

    /// Syntax-check the file without executing it.
    async fn check_syntax(&self, artifact: &Artifact, workspace: &Path) -> Option<ExecutionVerdict> {
        let spec = self
            .command(workspace)
            .arg("-c")
            .arg(SYNTAX_CHECK)
            .arg(artifact.path.to_string_lossy())
            .timeout(self.settings.syntax_timeout());

        match self.executor.run(&spec).await {
            Ok(outcome) if outcome.success() => None,
            Ok(outcome) if outcome.timed_out => Some(
                ExecutionVerdict::timeout("syntax check timed out")
                    .with_duration(outcome.duration),
            ),
            Ok(outcome) => {
                let excerpt = tail_excerpt(&outcome.stderr, EXCERPT_LIMIT);
                let detail = outcome
                    .stderr
                    .lines()
                    .rev()
                    .find(|line| line.contains("Error"))
                    .map(|line| line.trim().to_string())
                    .unwrap_or_else(|| "syntax check failed".to_string());
                Some(
                    ExecutionVerdict::runtime_error(detail)
                        .with_excerpt(excerpt)
                        .with_exit_code(outcome.exit_code)
                        .with_duration(outcome.duration),
                )
            }
            Err(e) => Some(ExecutionVerdict::runtime_error(format!(
                "could not start interpreter: {}",
                e
            ))),
        }
    }

    /// Validate one Python artifact.
    pub async fn validate(
        &self,
        artifact: &Artifact,
        workspace: &Path,
        profile: TimeoutProfile,
    ) -> ExecutionVerdict {
        if let Some(failed) = self.check_syntax(artifact, workspace).await {
            return failed;
        }

        let source = match artifact.read_source() {
            Ok(source) => source,
            Err(e) => return ExecutionVerdict::runtime_error(format!("unreadable artifact: {}", e)),
        };

        let timeout = self.settings.run_timeout(profile);
        let spec = self
            .command(workspace)
            .arg(artifact.path.to_string_lossy())
            .timeout(timeout);

        if is_server_script(&source) {
            return self.validate_server(&spec, &source).await;
        }

        match self.executor.run(&spec).await {
            Ok(outcome) => classify_outcome(&outcome, timeout),
            Err(e) => ExecutionVerdict::runtime_error(format!("could not start script: {}", e)),
        }
    }

    async fn validate_server(&self, spec: &CommandSpec, source: &str) -> ExecutionVerdict {
        let liveness = match extract_port(source) {
            Some(port) => Liveness::Port {
                host: "127.0.0.1".to_string(),
                port,
            },
            None => Liveness::GracePeriod(self.settings.probe_grace()),
        };
        debug!(liveness = ?liveness, "Validating server script in probe mode");

        let probe = ProbeSpec {
            liveness: liveness.clone(),
            bound: self.settings.probe_bound(),
            poll_interval: self.settings.probe_poll(),
        };

        let result = match self.executor.probe(spec, &probe).await {
            Ok(result) => result,
            Err(e) => {
                return ExecutionVerdict::runtime_error(format!("could not start server: {}", e))
            }
        };

        match result.state {
            ProbeState::Live => {
                let excerpt = tail_excerpt(&result.outcome.stdout, EXCERPT_LIMIT);
                ExecutionVerdict::clean()
                    .with_excerpt(excerpt)
                    .with_duration(result.outcome.duration)
            }
            ProbeState::Exited(_) => classify_outcome(&result.outcome, spec.timeout),
            ProbeState::Expired => {
                let what = match liveness {
                    Liveness::Port { port, .. } => format!("port {} never became connectable", port),
                    Liveness::GracePeriod(_) => "server never became live".to_string(),
                };
                ExecutionVerdict::timeout(format!(
                    "{} within {}s",
                    what,
                    probe.bound.as_secs()
                ))
                .with_excerpt(tail_excerpt(&result.outcome.stderr, EXCERPT_LIMIT))
                .with_duration(result.outcome.duration)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::verdict::VerdictStatus;

    fn outcome(code: Option<i32>, stderr: &str, timed_out: bool) -> ExecutionOutcome {
        ExecutionOutcome {
            exit_code: code,
            stdout: "hello\n".to_string(),
            stderr: stderr.to_string(),
            duration: Duration::from_millis(20),
            timed_out,
            stdout_truncated: false,
            stderr_truncated: false,
        }
    }

    #[test]
    fn test_server_detection() {
        assert!(is_server_script(
            "with socketserver.TCPServer(('', 8000), H) as s:\n    s.serve_forever()"
        ));
        assert!(is_server_script("app.run(debug=True)"));
        assert!(!is_server_script("print('hi')"));
    }

    #[test]
    fn test_extract_port() {
        assert_eq!(extract_port("PORT = 8080\n"), Some(8080));
        assert_eq!(extract_port("app.run(port=5001)"), Some(5001));
        assert_eq!(extract_port("HTTPServer(('', 9000), Handler)"), Some(9000));
        assert_eq!(extract_port("HTTPServer(('localhost', 8765), Handler)"), Some(8765));
        assert_eq!(extract_port("print('no server')"), None);
        assert_eq!(extract_port("port = 99999"), None);
    }

    #[test]
    fn test_missing_module() {
        let stderr = "Traceback (most recent call last):\n  File \"main.py\", line 1\nModuleNotFoundError: No module named 'numpy'\n";
        assert_eq!(
            missing_module(stderr).as_deref(),
            Some("ModuleNotFoundError: No module named 'numpy'")
        );
    }

    #[test]
    fn test_classify_clean() {
        let verdict = classify_outcome(&outcome(Some(0), "", false), Duration::from_secs(30));
        assert_eq!(verdict.status, VerdictStatus::Clean);
        assert_eq!(verdict.excerpt, "hello");
    }

    #[test]
    fn test_classify_nonzero_exit() {
        let verdict = classify_outcome(&outcome(Some(2), "bad args", false), Duration::from_secs(30));
        assert_eq!(verdict.status, VerdictStatus::RuntimeError);
        assert_eq!(verdict.detail.as_deref(), Some("exited with code 2"));
        assert_eq!(verdict.excerpt, "bad args");
    }

    #[test]
    fn test_classify_traceback_with_zero_exit() {
        let stderr = "Traceback (most recent call last):\n  File \"t.py\"\nValueError: nope";
        let verdict = classify_outcome(&outcome(Some(0), stderr, false), Duration::from_secs(30));
        assert_eq!(verdict.status, VerdictStatus::RuntimeError);
    }

    #[test]
    fn test_classify_timeout() {
        let verdict = classify_outcome(&outcome(None, "", true), Duration::from_secs(10));
        assert_eq!(verdict.status, VerdictStatus::Timeout);
        assert_eq!(verdict.detail.as_deref(), Some("timed out after 10s"));
    }
}
