//! Judge request and score types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::code::CodeFile;
use crate::llm::Usage;

/// A dimension a judge is asked to score, with the guidance shown to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeDimension {
    pub name: String,
    pub description: String,
}

impl JudgeDimension {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// The dimensions judges score by default.
pub fn default_dimensions() -> Vec<JudgeDimension> {
    vec![
        JudgeDimension::new(
            "features_complete",
            "Check EACH feature in the spec. Missing any feature caps the score at 6; missing half caps it at 3.",
        ),
        JudgeDimension::new(
            "output_quality",
            "Would the output actually match expectations? Verify the logic produces correct results.",
        ),
        JudgeDimension::new(
            "direction_following",
            "Did they build exactly what was asked? Wrong framework, unwanted extras or a misread spec are penalized.",
        ),
        JudgeDimension::new(
            "code_quality",
            "Is it readable, well-organized and idiomatic? No error handling caps the score at 5.",
        ),
    ]
}

/// Everything a judge sees for one RunTarget. Judges never see each other's
/// output.
#[derive(Debug, Clone)]
pub struct JudgeRequest {
    pub case_id: String,
    pub spec: String,
    pub files: Vec<CodeFile>,
    pub dimensions: Vec<JudgeDimension>,
}

impl JudgeRequest {
    pub fn dimension_names(&self) -> Vec<String> {
        self.dimensions.iter().map(|d| d.name.clone()).collect()
    }
}

/// One dimension's score and the judge's reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    /// 0 to 10.
    pub score: f64,
    #[serde(default)]
    pub reason: String,
}

/// One judge's complete, well-formed opinion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeScore {
    pub judge_id: String,
    pub model: String,
    pub scores: BTreeMap<String, DimensionScore>,
    pub latency_ms: u64,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub cost_usd: f64,
}

impl JudgeScore {
    pub fn score(&self, dimension: &str) -> Option<f64> {
        self.scores.get(dimension).map(|d| d.score)
    }
}

/// A judge that produced nothing usable for this RunTarget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeFailure {
    pub judge_id: String,
    pub model: String,
    pub error: String,
    /// Paid for even though the answer was unusable.
    #[serde(default)]
    pub cost_usd: f64,
}
