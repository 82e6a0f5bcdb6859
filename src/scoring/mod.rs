//! Rubric-weighted scoring with an execution gate.
//!
//! Each rubric dimension reads a 0-10 sub-score from the execution verdict,
//! the functional tests, or the judge consensus. Dimensions whose source is
//! unavailable are excluded and the remaining weights renormalized. Runs
//! that fail to execute, or fail their suite, are capped regardless of what
//! judges thought.

pub mod aggregator;
pub mod rubric;

pub use aggregator::{
    execution_sub_score, test_sub_score, DimensionBreakdown, ScoreAggregator, ScoreBreakdown,
};
pub use rubric::{DimensionSource, Rubric, RubricWeight, EDGE_CASE_FALLBACK};
