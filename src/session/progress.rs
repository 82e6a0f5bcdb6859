//! Background progress monitor for evaluation sessions.
//!
//! Periodically logs how many RunTargets have finished, been gated or
//! skipped, so operators can follow long sessions without reading every
//! per-target log line.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

/// Snapshot of session counters at a point in time.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    /// RunTargets with a result in the ledger from this session.
    pub completed: usize,
    /// Completed RunTargets whose total was capped by the execution gate.
    pub gated: usize,
    /// RunTargets that hit the per-target timeout.
    pub timed_out: usize,
    /// RunTargets skipped because the ledger already had them.
    pub skipped: usize,
    /// RunTargets currently being evaluated.
    pub active: usize,
    pub elapsed: Duration,
}

/// Shared atomic counters, cloned into every worker task.
#[derive(Debug, Clone)]
pub struct ProgressCounters {
    pub completed: Arc<AtomicUsize>,
    pub gated: Arc<AtomicUsize>,
    pub timed_out: Arc<AtomicUsize>,
    pub skipped: Arc<AtomicUsize>,
    pub active: Arc<AtomicUsize>,
}

impl Default for ProgressCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self {
            completed: Arc::new(AtomicUsize::new(0)),
            gated: Arc::new(AtomicUsize::new(0)),
            timed_out: Arc::new(AtomicUsize::new(0)),
            skipped: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn snapshot(&self, start: Instant) -> ProgressSnapshot {
        ProgressSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            gated: self.gated.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            elapsed: start.elapsed(),
        }
    }
}

/// A background task that logs session progress every `interval`.
///
/// Call [`ProgressMonitor::stop`] to cancel.
pub struct ProgressMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    /// Start logging progress toward `total` RunTargets.
    pub fn start(counters: ProgressCounters, total: usize, interval: Duration) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // skip the immediate first tick

            loop {
                tick.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                let snap = counters.snapshot(start);
                let done = snap.completed + snap.skipped;
                let pct = if total > 0 {
                    (done as f64 / total as f64 * 100.0).min(100.0)
                } else {
                    0.0
                };
                let elapsed_secs = snap.elapsed.as_secs_f64();
                let per_min = if elapsed_secs > 0.0 {
                    snap.completed as f64 / elapsed_secs * 60.0
                } else {
                    0.0
                };

                tracing::info!(
                    completed = snap.completed,
                    gated = snap.gated,
                    timed_out = snap.timed_out,
                    skipped = snap.skipped,
                    active = snap.active,
                    total = total,
                    progress_pct = format!("{:.1}%", pct),
                    elapsed_secs = snap.elapsed.as_secs(),
                    targets_per_min = format!("{:.2}", per_min),
                    "Evaluation progress"
                );
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Stop the monitor without waiting for the next tick.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}
