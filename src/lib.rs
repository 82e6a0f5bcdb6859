//! vibe-eval: execution and scoring core for evaluating LLM-generated programs.
//!
//! Given the workspace a model produced for a case, vibe-eval runs the
//! program in a sandbox, checks it with the case's functional tests, asks a
//! panel of LLM judges for scores, and folds everything into one gated 0-100
//! total that is appended to a crash-safe JSONL ledger.

pub mod artifact;
pub mod cli;
pub mod config;
pub mod error;
pub mod judge;
pub mod ledger;
pub mod llm;
pub mod metrics;
pub mod sandbox;
pub mod scoring;
pub mod session;
pub mod test_runner;
pub mod utils;
pub mod validation;

// Re-export commonly used error types
pub use error::{
    BrowserError, CaseError, ConfigError, JudgeError, LedgerError, LlmError, SandboxError,
    SessionError,
};
