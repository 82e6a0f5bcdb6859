//! Error types for vibe-eval operations.
//!
//! Defines error types for every subsystem:
//! - Sandbox process execution
//! - LLM API interactions and judge scoring
//! - Result ledger persistence
//! - Configuration and case definitions
//! - Session orchestration
//!
//! Component-local failures (sandbox, judge, test) are converted into verdict
//! values at their component boundary. Only [`LedgerError`] and
//! [`ConfigError`] are allowed to terminate a session.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while spawning or supervising a sandboxed process.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Blocked command: {0}")]
    Blocked(String),

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Working directory does not exist: {0}")]
    MissingWorkdir(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the headless browser driver.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// No usable browser automation on this host.
    #[error("Browser unavailable: {0}")]
    Unavailable(String),

    #[error("Browser probe protocol error: {0}")]
    Protocol(String),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors produced by a single judge. Never propagated past the arbitrator.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Judge timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed judge response: {reason}")]
    Malformed { reason: String, cost_usd: f64 },

    #[error("Empty judge response")]
    EmptyResponse { cost_usd: f64 },
}

impl JudgeError {
    /// Spend already incurred when the judge failed. Zero when no answer came back.
    pub fn cost_usd(&self) -> f64 {
        match self {
            JudgeError::Malformed { cost_usd, .. } | JudgeError::EmptyResponse { cost_usd } => {
                *cost_usd
            }
            JudgeError::Llm(_) | JudgeError::Timeout(_) => 0.0,
        }
    }
}

/// Errors that can occur while persisting or loading the result ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Ledger write failed after {attempts} attempts: {message}")]
    WriteFailed { attempts: u32, message: String },

    #[error("Ledger writer is closed")]
    Closed,
}

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur while loading a case definition.
#[derive(Debug, Error)]
pub enum CaseError {
    #[error("Case directory not found: {0}")]
    NotFound(PathBuf),

    #[error("Case '{0}' has no spec.md")]
    MissingSpec(String),

    #[error("Invalid rubric: {0}")]
    InvalidRubric(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that terminate an evaluation session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Worker task failed: {0}")]
    Worker(String),
}
