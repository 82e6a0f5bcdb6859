//! Metrics module for Prometheus-based monitoring.
//!
//! Tracks verdicts, judge traffic and spend, score distribution, gate hits
//! and ledger writes.
//!
//! ```ignore
//! use vibe_eval::metrics::{export_metrics, init_metrics, MetricsCollector};
//!
//! init_metrics()?;
//! MetricsCollector::new().record_score(72.5, false);
//! let text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ACTIVE_WORKERS, GATED_TOTAL, JUDGE_COST_CENTS, JUDGE_LATENCY, JUDGE_REQUESTS_TOTAL,
    LEDGER_WRITES_TOTAL, REGISTRY, RUNS_TOTAL, RUN_DURATION, SCORE,
};
