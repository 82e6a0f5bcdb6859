//! Crash-safe persistence of scored results.
//!
//! The ledger is JSONL, one [`ScoredResult`] per line. Appends are durable
//! before they are acknowledged, so a crash loses at most the record being
//! written, and a reopened ledger resumes by skipping keys it already holds.

pub mod load;
pub mod record;
pub mod writer;

pub use load::{load_ledger, LoadedLedger};
pub use record::{RunKey, RunMetadata, ScoredResult, RUN_METADATA_FILE};
pub use writer::ResultLedger;
