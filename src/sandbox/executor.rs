//! Sandboxed process execution.
//!
//! Every child runs in its own process group so that a timeout or a dropped
//! future kills the whole tree, not just the direct child. Output is captured
//! up to a byte bound while the pipes keep draining, so a chatty child never
//! blocks on a full pipe.
//!
//! Probe mode starts a long-running process (a server), polls a liveness
//! condition up to a bound, then terminates it.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::guard::{DependencyGuard, GuardVerdict};
use crate::error::SandboxError;

/// Environment variable suffixes never passed to untrusted children.
const SECRET_ENV_SUFFIXES: &[&str] = &["_API_KEY", "_TOKEN", "_SECRET"];

/// How long to wait for pipe readers after the process group is gone.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A command to run inside the sandbox.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Shell-like rendering used for guard checks and logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// What a finished (or killed) process left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    /// Exit code; `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

impl ExecutionOutcome {
    /// Exited on its own with code 0.
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Condition that proves a long-running process is up.
#[derive(Debug, Clone, PartialEq)]
pub enum Liveness {
    /// A TCP connect to `host:port` succeeds while the process is alive.
    Port { host: String, port: u16 },
    /// The process is still alive after this long.
    GracePeriod(Duration),
}

/// Probe-mode parameters.
#[derive(Debug, Clone)]
pub struct ProbeSpec {
    pub liveness: Liveness,
    /// Upper bound on the whole wait.
    pub bound: Duration,
    pub poll_interval: Duration,
}

/// Result of waiting for liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Live,
    /// The process exited before liveness; carries its exit code.
    Exited(Option<i32>),
    /// The bound elapsed with the process still running but not live.
    Expired,
}

/// Result of a full probe-mode run.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub state: ProbeState,
    /// Output gathered until the process was stopped.
    pub outcome: ExecutionOutcome,
}

impl ProbeOutcome {
    pub fn alive(&self) -> bool {
        self.state == ProbeState::Live
    }
}

#[derive(Debug, Default)]
struct Capture {
    data: Vec<u8>,
    truncated: bool,
}

impl Capture {
    fn push(&mut self, chunk: &[u8], limit: usize) {
        let room = limit.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.data.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
}

/// Kills the whole process group when dropped.
struct ProcessGroup {
    pgid: Option<i32>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|p| i32::try_from(p).ok()),
        }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: i32) {
    // SAFETY: kill(2) with a negative pid signals a process group; it has no
    // memory-safety preconditions.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, "Process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: i32) {}

/// A spawned sandbox process.
///
/// Dropping it kills the process group, so cancellation of the owning future
/// never leaks children.
pub struct RunningProcess {
    child: Child,
    group: ProcessGroup,
    stdout: Arc<Mutex<Capture>>,
    stderr: Arc<Mutex<Capture>>,
    readers: Vec<JoinHandle<()>>,
    started: Instant,
    program: String,
}

impl RunningProcess {
    /// OS process id of the group leader.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for exit up to `timeout`, killing the group when it elapses.
    pub async fn wait_with_timeout(mut self, timeout: Duration) -> ExecutionOutcome {
        let (exit_code, timed_out) = match tokio::time::timeout(timeout, self.child.wait()).await
        {
            Ok(Ok(status)) => (status.code(), false),
            Ok(Err(e)) => {
                warn!(program = %self.program, error = %e, "Failed to wait on child");
                (None, false)
            }
            Err(_) => {
                debug!(program = %self.program, timeout_secs = timeout.as_secs_f64(), "Child timed out");
                (None, true)
            }
        };
        self.finish(exit_code, timed_out).await
    }

    /// Poll the liveness condition until it holds, the process exits, or the
    /// bound elapses.
    pub async fn wait_until_live(&mut self, probe: &ProbeSpec) -> Result<ProbeState, SandboxError> {
        let deadline = self.started + probe.bound;

        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(ProbeState::Exited(status.code()));
            }

            let live = match &probe.liveness {
                Liveness::Port { host, port } => {
                    let attempt = probe.poll_interval.max(Duration::from_millis(50));
                    let connected = matches!(
                        tokio::time::timeout(attempt, TcpStream::connect((host.as_str(), *port)))
                            .await,
                        Ok(Ok(_))
                    );
                    // Another process may own the port; only count it while ours runs.
                    connected && self.child.try_wait()?.is_none()
                }
                Liveness::GracePeriod(grace) => self.started.elapsed() >= *grace,
            };

            if live {
                return Ok(ProbeState::Live);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(ProbeState::Expired);
            }
            tokio::time::sleep(probe.poll_interval.min(deadline - now)).await;
        }
    }

    /// Kill the process group and collect whatever output was produced.
    pub async fn terminate(mut self) -> ExecutionOutcome {
        let exit_code = match self.child.try_wait() {
            Ok(Some(status)) => status.code(),
            _ => None,
        };
        self.finish(exit_code, false).await
    }

    async fn finish(mut self, exit_code: Option<i32>, timed_out: bool) -> ExecutionOutcome {
        self.group.kill();
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;

        for reader in self.readers.drain(..) {
            let abort = reader.abort_handle();
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
                // A daemonized grandchild escaped the group and holds the pipe.
                abort.abort();
            }
        }

        let (stdout, stdout_truncated) = take_capture(&self.stdout);
        let (stderr, stderr_truncated) = take_capture(&self.stderr);

        ExecutionOutcome {
            exit_code,
            stdout,
            stderr,
            duration: self.started.elapsed(),
            timed_out,
            stdout_truncated,
            stderr_truncated,
        }
    }
}

fn take_capture(capture: &Arc<Mutex<Capture>>) -> (String, bool) {
    match capture.lock() {
        Ok(mut cap) => {
            let data = std::mem::take(&mut cap.data);
            (String::from_utf8_lossy(&data).into_owned(), cap.truncated)
        }
        Err(_) => (String::new(), false),
    }
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R, sink: Arc<Mutex<Capture>>, limit: usize) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Ok(mut cap) = sink.lock() {
                    cap.push(&chunk[..n], limit);
                }
            }
        }
    }
}

/// Runs untrusted commands with bounded output and process-tree timeouts.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    max_output_bytes: usize,
    guard: Option<DependencyGuard>,
}

impl SandboxExecutor {
    pub fn new(max_output_bytes: usize) -> Self {
        Self {
            max_output_bytes,
            guard: None,
        }
    }

    /// Refuse command lines the guard blocks.
    pub fn with_guard(mut self, guard: DependencyGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn max_output_bytes(&self) -> usize {
        self.max_output_bytes
    }

    /// Spawn `spec` in a fresh process group.
    pub fn start(&self, spec: &CommandSpec) -> Result<RunningProcess, SandboxError> {
        if spec.program.trim().is_empty() {
            return Err(SandboxError::EmptyCommand);
        }
        if let Some(guard) = &self.guard {
            if let GuardVerdict::Blocked { reason } = guard.check_command(&spec.command_line()) {
                return Err(SandboxError::Blocked(reason));
            }
        }
        if !spec.cwd.is_dir() {
            return Err(SandboxError::MissingWorkdir(spec.cwd.clone()));
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        for (key, _) in std::env::vars_os() {
            let name = key.to_string_lossy();
            if SECRET_ENV_SUFFIXES.iter().any(|s| name.ends_with(s)) {
                cmd.env_remove(&key);
            }
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let group = ProcessGroup::new(child.id());
        debug!(command = %spec.command_line(), pid = ?child.id(), "Spawned sandbox process");

        let stdout = Arc::new(Mutex::new(Capture::default()));
        let stderr = Arc::new(Mutex::new(Capture::default()));
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(tokio::spawn(drain(out, stdout.clone(), self.max_output_bytes)));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(tokio::spawn(drain(err, stderr.clone(), self.max_output_bytes)));
        }

        Ok(RunningProcess {
            child,
            group,
            stdout,
            stderr,
            readers,
            started: Instant::now(),
            program: spec.program.clone(),
        })
    }

    /// Run `spec` to completion or until its timeout.
    pub async fn run(&self, spec: &CommandSpec) -> Result<ExecutionOutcome, SandboxError> {
        let process = self.start(spec)?;
        Ok(process.wait_with_timeout(spec.timeout).await)
    }

    /// Start `spec`, wait for liveness, then terminate it.
    ///
    /// A process that exits before becoming live is reported as
    /// [`ProbeState::Exited`] with its full output, so callers can classify it
    /// like an ordinary run.
    pub async fn probe(
        &self,
        spec: &CommandSpec,
        probe: &ProbeSpec,
    ) -> Result<ProbeOutcome, SandboxError> {
        let mut process = self.start(spec)?;
        let state = match process.wait_until_live(probe).await {
            Ok(state) => state,
            Err(e) => {
                process.terminate().await;
                return Err(e);
            }
        };

        let outcome = match state {
            ProbeState::Exited(code) => {
                let mut outcome = process.terminate().await;
                outcome.exit_code = code;
                outcome
            }
            ProbeState::Live => process.terminate().await,
            ProbeState::Expired => {
                let mut outcome = process.terminate().await;
                outcome.timed_out = true;
                outcome
            }
        };

        debug!(command = %spec.command_line(), state = ?state, "Probe finished");
        Ok(ProbeOutcome { state, outcome })
    }
}
