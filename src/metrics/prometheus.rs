//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by vibe-eval and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::{Mutex, OnceLock};

/// Serializes initialization so every static comes from the same registry.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Global Prometheus registry for all vibe-eval metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total RunTargets evaluated, labeled by verdict status and model.
pub static RUNS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// RunTarget wall-clock duration in seconds, labeled by artifact kind.
pub static RUN_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Judge requests, labeled by judge id and outcome.
pub static JUDGE_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Judge latency in seconds, labeled by judge id.
pub static JUDGE_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Judge spend in cents, labeled by judge model.
pub static JUDGE_COST_CENTS: OnceLock<CounterVec> = OnceLock::new();

/// Distribution of final scores (0-100).
pub static SCORE: OnceLock<Histogram> = OnceLock::new();

/// Runs whose total was capped by the execution gate.
pub static GATED_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Ledger writes, labeled by outcome (ok, retry, failed).
pub static LEDGER_WRITES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Number of RunTargets currently being evaluated.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Repeated calls are harmless: the first registry wins.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let runs_total = CounterVec::new(
        Opts::new("vibe_eval_runs_total", "Total RunTargets evaluated"),
        &["status", "model"],
    )?;

    let run_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "vibe_eval_run_duration_seconds",
            "RunTarget evaluation duration in seconds",
        )
        .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["kind"],
    )?;

    let judge_requests_total = CounterVec::new(
        Opts::new("vibe_eval_judge_requests_total", "Total judge requests"),
        &["judge", "outcome"],
    )?;

    let judge_latency = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "vibe_eval_judge_latency_seconds",
            "Judge request latency in seconds",
        )
        .buckets(vec![1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["judge"],
    )?;

    let judge_cost_cents = CounterVec::new(
        Opts::new("vibe_eval_judge_cost_cents", "Judge API costs in cents"),
        &["model"],
    )?;

    let score = Histogram::with_opts(
        prometheus::HistogramOpts::new("vibe_eval_score", "Distribution of final scores")
            .buckets(vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0]),
    )?;

    let gated_total = Counter::new(
        "vibe_eval_gated_total",
        "Runs capped by the execution gate",
    )?;

    let ledger_writes_total = CounterVec::new(
        Opts::new("vibe_eval_ledger_writes_total", "Ledger write attempts"),
        &["outcome"],
    )?;

    let active_workers = Gauge::new(
        "vibe_eval_active_workers",
        "RunTargets currently being evaluated",
    )?;

    registry.register(Box::new(runs_total.clone()))?;
    registry.register(Box::new(run_duration.clone()))?;
    registry.register(Box::new(judge_requests_total.clone()))?;
    registry.register(Box::new(judge_latency.clone()))?;
    registry.register(Box::new(judge_cost_cents.clone()))?;
    registry.register(Box::new(score.clone()))?;
    registry.register(Box::new(gated_total.clone()))?;
    registry.register(Box::new(ledger_writes_total.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = RUNS_TOTAL.set(runs_total);
    let _ = RUN_DURATION.set(run_duration);
    let _ = JUDGE_REQUESTS_TOTAL.set(judge_requests_total);
    let _ = JUDGE_LATENCY.set(judge_latency);
    let _ = JUDGE_COST_CENTS.set(judge_cost_cents);
    let _ = SCORE.set(score);
    let _ = GATED_TOTAL.set(gated_total);
    let _ = LEDGER_WRITES_TOTAL.set(ledger_writes_total);
    let _ = ACTIVE_WORKERS.set(active_workers);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns an explanatory comment line if the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_init() {
        let _ = init_metrics();
        if let Some(gated) = GATED_TOTAL.get() {
            gated.inc();
        }
        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("vibe_eval_gated_total"));
    }
}
