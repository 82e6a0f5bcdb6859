//! Evaluation sessions: cases, RunTargets and the concurrent runner.
//!
//! A session crosses every case with every model, evaluates each resulting
//! RunTarget at most once per ledger, and reports a [`SessionSummary`].

pub mod case;
pub mod progress;
pub mod runner;
pub mod summary;
pub mod target;

pub use case::{discover_cases, CaseDefinition, CaseManifest, MANIFEST_FILE, SPEC_FILE, TESTS_FILE};
pub use progress::{ProgressCounters, ProgressMonitor, ProgressSnapshot};
pub use runner::{judge_dimensions_for, EvaluationSession, Evaluator};
pub use summary::{summarize_results, ModelSummary, SessionSummary};
pub use target::{build_jobs, model_slug, EvaluationJob, RunTarget};
