//! Shared utility functions for vibe-eval.
//!
//! Text excerpting for verdicts and test errors, and JSON extraction from
//! judge responses.

pub mod json_extraction;
pub mod text;

pub use json_extraction::{find_matching_brace, try_extract_json_object, JsonExtractionResult};
pub use text::{tail_excerpt, truncate};
