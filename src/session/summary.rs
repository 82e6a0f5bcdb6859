//! Per-model roll-ups of scored results.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ledger::ScoredResult;

/// Aggregate numbers for one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub runs: usize,
    pub gated: usize,
    pub mean_score: f64,
    #[serde(skip)]
    score_sum: f64,
}

impl ModelSummary {
    pub fn record(&mut self, total: f64, gated: bool) {
        self.runs += 1;
        self.score_sum += total;
        if gated {
            self.gated += 1;
        }
        self.mean_score = ((self.score_sum / self.runs as f64) * 100.0).round() / 100.0;
    }
}

/// Group `results` by model.
pub fn summarize_results(results: &[ScoredResult]) -> BTreeMap<String, ModelSummary> {
    let mut by_model: BTreeMap<String, ModelSummary> = BTreeMap::new();
    for result in results {
        by_model
            .entry(result.model_id.clone())
            .or_default()
            .record(result.score.total, result.score.gated);
    }
    by_model
}

/// What one call to `EvaluationSession::run` did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_jobs: usize,
    pub evaluated: usize,
    /// Already in the ledger before the session started.
    pub skipped: usize,
    pub gated: usize,
    pub timed_out: usize,
    /// Workers that panicked; their targets have no result.
    pub failed_workers: usize,
    pub judge_cost_usd: f64,
    pub per_model: BTreeMap<String, ModelSummary>,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::fixtures::sample_result;

    #[test]
    fn test_summarize_by_model() {
        let mut gated = sample_result("b", "openai/gpt-4o", 30.0);
        gated.score.gated = true;
        let results = vec![
            sample_result("a", "openai/gpt-4o", 80.0),
            gated,
            sample_result("a", "google/gemini", 55.5),
        ];
        let summary = summarize_results(&results);
        assert_eq!(summary.len(), 2);
        let gpt = &summary["openai/gpt-4o"];
        assert_eq!(gpt.runs, 2);
        assert_eq!(gpt.gated, 1);
        assert_eq!(gpt.mean_score, 55.0);
        assert_eq!(summary["google/gemini"].mean_score, 55.5);
    }
}
