//! Weighted totals with the execution gate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::rubric::{DimensionSource, Rubric};
use crate::config::ScoringSettings;
use crate::judge::ConsensusScore;
use crate::test_runner::TestResult;
use crate::validation::ExecutionVerdict;

/// Execution sub-score for a clean run that produced warnings.
const WARNED_EXECUTION_SCORE: f64 = 8.0;

/// How one rubric dimension contributed to the total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionBreakdown {
    /// 0-10, absent when the source was unavailable.
    pub sub_score: Option<f64>,
    /// Weight as written in the rubric.
    pub weight: f64,
    /// Weight after renormalizing over available dimensions.
    pub effective_weight: f64,
    /// Source the sub-score was read from.
    pub source: String,
}

/// The scored outcome of one RunTarget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub dimensions: BTreeMap<String, DimensionBreakdown>,
    /// Dimensions dropped because their source was unavailable.
    pub excluded: Vec<String>,
    /// Weighted total before the gate, 0-100.
    pub raw_total: f64,
    /// Final total, 0-100.
    pub total: f64,
    pub gated: bool,
    pub gate_reason: Option<String>,
}

/// Execution sub-score on the 0-10 scale.
pub fn execution_sub_score(verdict: &ExecutionVerdict) -> f64 {
    if !verdict.is_clean() {
        0.0
    } else if verdict.has_warnings() {
        WARNED_EXECUTION_SCORE
    } else {
        10.0
    }
}

/// Test sub-score on the 0-10 scale.
pub fn test_sub_score(tests: &TestResult) -> f64 {
    tests.pass_rate * 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Combines verdict, tests and consensus into a [`ScoreBreakdown`].
#[derive(Debug, Clone)]
pub struct ScoreAggregator {
    gate_threshold: f64,
    gate_cap: f64,
}

impl Default for ScoreAggregator {
    fn default() -> Self {
        Self::new(&ScoringSettings::default())
    }
}

impl ScoreAggregator {
    pub fn new(settings: &ScoringSettings) -> Self {
        Self {
            gate_threshold: settings.gate_threshold,
            gate_cap: settings.gate_cap,
        }
    }

    /// Decide the gate from execution and tests alone. Judges never affect it.
    pub fn gate(&self, verdict: &ExecutionVerdict, tests: Option<&TestResult>) -> Option<String> {
        let execution = execution_sub_score(verdict);
        if execution < self.gate_threshold {
            return Some(format!(
                "execution sub-score {:.1} below {:.1} ({})",
                execution, self.gate_threshold, verdict.status
            ));
        }
        if let Some(tests) = tests {
            let score = test_sub_score(tests);
            if score < self.gate_threshold {
                return Some(format!(
                    "test sub-score {:.1} below {:.1} ({}/{} passed)",
                    score, self.gate_threshold, tests.passed, tests.total
                ));
            }
        }
        None
    }

    pub fn aggregate(
        &self,
        rubric: &Rubric,
        verdict: &ExecutionVerdict,
        tests: Option<&TestResult>,
        consensus: &ConsensusScore,
    ) -> ScoreBreakdown {
        let judged = consensus.consensus();

        let mut resolved = Vec::with_capacity(rubric.weights().len());
        for entry in rubric.weights() {
            let (source, sub_score) = match DimensionSource::for_name(&entry.name) {
                DimensionSource::Execution => {
                    (DimensionSource::Execution, Some(execution_sub_score(verdict)))
                }
                DimensionSource::Tests => (DimensionSource::Tests, tests.map(test_sub_score)),
                DimensionSource::TestsOrJudge(judge) => match tests {
                    Some(t) => (DimensionSource::Tests, Some(test_sub_score(t))),
                    None => {
                        let score = judged.and_then(|c| c.get(&judge));
                        (DimensionSource::Judge(judge), score)
                    }
                },
                DimensionSource::Judge(judge) => {
                    let score = judged.and_then(|c| c.get(&judge));
                    (DimensionSource::Judge(judge), score)
                }
            };
            resolved.push((entry, source, sub_score));
        }

        let available_weight: f64 = resolved
            .iter()
            .filter(|(_, _, score)| score.is_some())
            .map(|(entry, _, _)| entry.weight)
            .sum();

        let mut dimensions = BTreeMap::new();
        let mut excluded = Vec::new();
        let mut weighted = 0.0;
        for (entry, source, sub_score) in resolved {
            let effective_weight = match sub_score {
                Some(score) if available_weight > 0.0 => {
                    let w = entry.weight / available_weight;
                    weighted += w * score;
                    w
                }
                Some(_) => 0.0,
                None => {
                    excluded.push(entry.name.clone());
                    0.0
                }
            };
            dimensions.insert(
                entry.name.clone(),
                DimensionBreakdown {
                    sub_score,
                    weight: entry.weight,
                    effective_weight,
                    source: source.to_string(),
                },
            );
        }

        let raw_total = round2(weighted * 10.0);
        let gate_reason = self.gate(verdict, tests);
        let total = match gate_reason {
            Some(_) => raw_total.min(self.gate_cap),
            None => raw_total,
        };

        ScoreBreakdown {
            dimensions,
            excluded,
            raw_total,
            total,
            gated: gate_reason.is_some(),
            gate_reason,
        }
    }
}
