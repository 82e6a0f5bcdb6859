//! Command-line interface for vibe-eval.
//!
//! Provides commands for running evaluation sessions, validating a single
//! workspace, and summarizing a result ledger.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
