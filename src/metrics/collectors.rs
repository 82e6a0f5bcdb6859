//! High-level metric recording for evaluation sessions.
//!
//! [`MetricsCollector`] wraps the raw Prometheus statics with consistent
//! labels. Every method is a no-op until [`init_metrics`](super::init_metrics)
//! has run, so library users that never export metrics pay nothing.

use super::prometheus::{
    ACTIVE_WORKERS, GATED_TOTAL, JUDGE_COST_CENTS, JUDGE_LATENCY, JUDGE_REQUESTS_TOTAL,
    LEDGER_WRITES_TOTAL, RUNS_TOTAL, RUN_DURATION, SCORE,
};

/// Metrics collector for recording vibe-eval operational metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record one finished RunTarget.
    pub fn record_run(&self, status: &str, model: &str, kind: &str, duration_secs: f64) {
        if let Some(runs) = RUNS_TOTAL.get() {
            runs.with_label_values(&[status, model]).inc();
        }
        if let Some(duration) = RUN_DURATION.get() {
            duration.with_label_values(&[kind]).observe(duration_secs);
        }
        tracing::trace!(status, model, kind, duration_secs, "Recorded run metric");
    }

    /// Record one judge call. `outcome` is "ok", "timeout", "malformed" or "error".
    pub fn record_judge(
        &self,
        judge: &str,
        model: &str,
        outcome: &str,
        latency_secs: f64,
        cost_usd: f64,
    ) {
        if let Some(requests) = JUDGE_REQUESTS_TOTAL.get() {
            requests.with_label_values(&[judge, outcome]).inc();
        }
        if let Some(latency) = JUDGE_LATENCY.get() {
            latency.with_label_values(&[judge]).observe(latency_secs);
        }
        if cost_usd > 0.0 {
            if let Some(cost) = JUDGE_COST_CENTS.get() {
                cost.with_label_values(&[model]).inc_by(cost_usd * 100.0);
            }
        }
    }

    /// Record a final score and whether the gate capped it.
    pub fn record_score(&self, total: f64, gated: bool) {
        if let Some(score) = SCORE.get() {
            score.observe(total);
        }
        if gated {
            if let Some(counter) = GATED_TOTAL.get() {
                counter.inc();
            }
        }
    }

    /// Record a ledger write attempt outcome.
    pub fn record_ledger_write(&self, outcome: &str) {
        if let Some(writes) = LEDGER_WRITES_TOTAL.get() {
            writes.with_label_values(&[outcome]).inc();
        }
    }

    pub fn worker_started(&self) {
        if let Some(active) = ACTIVE_WORKERS.get() {
            active.inc();
        }
    }

    pub fn worker_finished(&self) {
        if let Some(active) = ACTIVE_WORKERS.get() {
            active.dec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    #[test]
    fn test_recording_shows_in_export() {
        init_metrics().unwrap();
        let collector = MetricsCollector::new();
        collector.record_run("CLEAN", "openai/gpt-4o", "python", 3.5);
        collector.record_judge("gpt-4o", "openai/gpt-4o", "ok", 2.0, 0.04);
        collector.record_ledger_write("ok");

        let text = export_metrics();
        assert!(text.contains("vibe_eval_runs_total"));
        assert!(text.contains("status=\"CLEAN\""));
        assert!(text.contains("vibe_eval_judge_cost_cents"));
        assert!(text.contains("vibe_eval_ledger_writes_total"));
    }

    #[test]
    fn test_worker_gauge() {
        init_metrics().unwrap();
        let collector = MetricsCollector::new();
        collector.worker_started();
        collector.worker_finished();
        assert!(export_metrics().contains("vibe_eval_active_workers"));
    }
}
