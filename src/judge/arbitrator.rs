//! Multi-judge arbitration.
//!
//! Every judge scores the same request concurrently. Failed judges are
//! excluded, the survivors are reduced to a per-dimension median, and judges
//! that sit far from the median on most dimensions are flagged. The flag is
//! informational: flagged judges still count toward the median.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use super::llm_judge::{Judge, LlmJudge};
use super::types::{JudgeFailure, JudgeRequest, JudgeScore};
use crate::config::JudgePanelConfig;
use crate::error::{JudgeError, LlmError};
use crate::llm::{api_key_from_env, CostTracker, LiteLlmClient, LlmProvider};
use crate::metrics::MetricsCollector;

/// Agreed judge scores for one RunTarget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consensus {
    /// Median score per dimension, 0 to 10.
    pub dimensions: BTreeMap<String, f64>,
    /// Judges that contributed, sorted.
    pub judges: Vec<String>,
    /// Judges flagged as outliers, sorted.
    pub divergent_judges: Vec<String>,
    /// True when any judge was flagged.
    pub disagreement: bool,
    /// Max minus min score per dimension.
    pub spreads: BTreeMap<String, f64>,
}

impl Consensus {
    pub fn get(&self, dimension: &str) -> Option<f64> {
        self.dimensions.get(dimension).copied()
    }
}

/// Consensus, or the reason there is none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsensusScore {
    Available(Consensus),
    Unavailable { reason: String },
}

impl ConsensusScore {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        ConsensusScore::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, ConsensusScore::Available(_))
    }

    pub fn consensus(&self) -> Option<&Consensus> {
        match self {
            ConsensusScore::Available(c) => Some(c),
            ConsensusScore::Unavailable { .. } => None,
        }
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Reduce successful judge scores to a consensus.
///
/// The result depends only on the set of scores, not their order.
pub fn reduce_consensus(scores: &[JudgeScore], dimensions: &[String], threshold: f64) -> ConsensusScore {
    if scores.is_empty() {
        return ConsensusScore::unavailable("no judge produced a valid score");
    }

    let mut medians = BTreeMap::new();
    let mut spreads = BTreeMap::new();
    for dimension in dimensions {
        let mut values: Vec<f64> = scores.iter().filter_map(|s| s.score(dimension)).collect();
        if values.is_empty() {
            return ConsensusScore::unavailable(format!("no judge scored '{}'", dimension));
        }
        let med = median(&mut values);
        // values are sorted by median()
        spreads.insert(dimension.clone(), values[values.len() - 1] - values[0]);
        medians.insert(dimension.clone(), med);
    }

    let mut judges: Vec<String> = scores.iter().map(|s| s.judge_id.clone()).collect();
    judges.sort();

    let mut divergent_judges: Vec<String> = scores
        .iter()
        .filter(|score| {
            let beyond = dimensions
                .iter()
                .filter(|d| match (score.score(d), medians.get(*d)) {
                    (Some(value), Some(med)) => (value - med).abs() > threshold,
                    _ => false,
                })
                .count();
            beyond * 2 > dimensions.len()
        })
        .map(|s| s.judge_id.clone())
        .collect();
    divergent_judges.sort();

    ConsensusScore::Available(Consensus {
        dimensions: medians,
        judges,
        disagreement: !divergent_judges.is_empty(),
        divergent_judges,
        spreads,
    })
}

/// Everything the arbitrator learned for one RunTarget.
#[derive(Debug, Clone)]
pub struct ArbitrationOutcome {
    pub consensus: ConsensusScore,
    pub scores: Vec<JudgeScore>,
    pub failures: Vec<JudgeFailure>,
    pub cost_usd: f64,
}

/// Fans a request out to a judge panel and reduces the answers.
pub struct MultiJudgeArbitrator {
    judges: Vec<Arc<dyn Judge>>,
    timeout: Duration,
    divergence_threshold: f64,
    metrics: MetricsCollector,
}

impl MultiJudgeArbitrator {
    pub fn new(judges: Vec<Arc<dyn Judge>>, timeout: Duration, divergence_threshold: f64) -> Self {
        Self {
            judges,
            timeout,
            divergence_threshold,
            metrics: MetricsCollector::new(),
        }
    }

    /// Build the configured panel on one shared OpenAI-compatible client.
    /// The API key comes from `LITELLM_API_KEY` or `OPENROUTER_API_KEY`.
    pub fn from_config(
        config: &JudgePanelConfig,
        costs: Option<Arc<CostTracker>>,
    ) -> Result<Self, LlmError> {
        let api_key = api_key_from_env();
        if api_key.is_none() {
            tracing::warn!("No judge API key set; judge calls will likely be rejected");
        }
        let client: Arc<dyn LlmProvider> = Arc::new(LiteLlmClient::new(
            config.api_base.clone(),
            api_key,
            config.timeout(),
        )?);

        let judges = config
            .judges
            .iter()
            .map(|spec| {
                let mut judge = LlmJudge::new(spec.id.clone(), spec.model.clone(), client.clone())
                    .with_temperature(config.temperature)
                    .with_max_tokens(config.max_tokens);
                if let Some(tracker) = &costs {
                    judge = judge.with_cost_tracker(tracker.clone());
                }
                Arc::new(judge) as Arc<dyn Judge>
            })
            .collect();

        Ok(Self::new(judges, config.timeout(), config.divergence_threshold))
    }

    pub fn judge_count(&self) -> usize {
        self.judges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.judges.is_empty()
    }

    /// Score `request` with every judge concurrently.
    pub async fn arbitrate(&self, request: &JudgeRequest) -> ArbitrationOutcome {
        let calls = self.judges.iter().map(|judge| async move {
            let started = Instant::now();
            let result = match tokio::time::timeout(self.timeout, judge.score(request)).await {
                Ok(result) => result,
                Err(_) => Err(JudgeError::Timeout(self.timeout)),
            };
            (judge, result, started.elapsed())
        });

        let mut scores = Vec::new();
        let mut failures = Vec::new();
        for (judge, result, elapsed) in join_all(calls).await {
            match result {
                Ok(score) => {
                    self.metrics.record_judge(
                        judge.id(),
                        judge.model(),
                        "ok",
                        elapsed.as_secs_f64(),
                        score.cost_usd,
                    );
                    scores.push(score);
                }
                Err(e) => {
                    let outcome = match &e {
                        JudgeError::Timeout(_) => "timeout",
                        JudgeError::Malformed { .. } | JudgeError::EmptyResponse { .. } => {
                            "malformed"
                        }
                        JudgeError::Llm(_) => "error",
                    };
                    self.metrics.record_judge(
                        judge.id(),
                        judge.model(),
                        outcome,
                        elapsed.as_secs_f64(),
                        e.cost_usd(),
                    );
                    tracing::warn!(
                        case_id = %request.case_id,
                        judge = %judge.id(),
                        error = %e,
                        "Judge failed; excluding from consensus"
                    );
                    failures.push(JudgeFailure {
                        judge_id: judge.id().to_string(),
                        model: judge.model().to_string(),
                        error: e.to_string(),
                        cost_usd: e.cost_usd(),
                    });
                }
            }
        }

        let consensus = reduce_consensus(
            &scores,
            &request.dimension_names(),
            self.divergence_threshold,
        );
        if let Some(c) = consensus.consensus() {
            if c.disagreement {
                tracing::info!(
                    case_id = %request.case_id,
                    divergent = ?c.divergent_judges,
                    "Judges disagree"
                );
            }
        }
        let cost_usd = scores.iter().map(|s| s.cost_usd).sum::<f64>()
            + failures.iter().map(|f| f.cost_usd).sum::<f64>();

        ArbitrationOutcome {
            consensus,
            scores,
            failures,
            cost_usd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::types::{default_dimensions, DimensionScore};
    use crate::llm::Usage;
    use async_trait::async_trait;

    fn dims() -> Vec<String> {
        default_dimensions().into_iter().map(|d| d.name).collect()
    }

    fn uniform(judge_id: &str, value: f64) -> JudgeScore {
        JudgeScore {
            judge_id: judge_id.to_string(),
            model: format!("test/{}", judge_id),
            scores: dims()
                .into_iter()
                .map(|d| {
                    (
                        d,
                        DimensionScore {
                            score: value,
                            reason: String::new(),
                        },
                    )
                })
                .collect(),
            latency_ms: 1,
            usage: Usage::default(),
            cost_usd: 0.01,
        }
    }

    enum Behavior {
        Score(f64),
        Malformed,
        Hang,
    }

    struct FakeJudge {
        id: String,
        behavior: Behavior,
    }

    impl FakeJudge {
        fn arc(id: &str, behavior: Behavior) -> Arc<dyn Judge> {
            Arc::new(Self {
                id: id.to_string(),
                behavior,
            })
        }
    }

    #[async_trait]
    impl Judge for FakeJudge {
        fn id(&self) -> &str {
            &self.id
        }

        fn model(&self) -> &str {
            "test/fake"
        }

        async fn score(&self, _request: &JudgeRequest) -> Result<JudgeScore, JudgeError> {
            match self.behavior {
                Behavior::Score(v) => Ok(uniform(&self.id, v)),
                Behavior::Malformed => Err(JudgeError::Malformed {
                    reason: "missing dimension".to_string(),
                    cost_usd: 0.01,
                }),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(uniform(&self.id, 10.0))
                }
            }
        }
    }

    fn request() -> JudgeRequest {
        JudgeRequest {
            case_id: "case".to_string(),
            spec: "spec".to_string(),
            files: Vec::new(),
            dimensions: default_dimensions(),
        }
    }

    #[test]
    fn test_outlier_flagged_median_kept() {
        let scores = vec![uniform("a", 9.0), uniform("b", 9.0), uniform("c", 2.0)];
        let consensus = reduce_consensus(&scores, &dims(), 3.0);
        let c = consensus.consensus().unwrap();
        assert_eq!(c.get("features_complete"), Some(9.0));
        assert_eq!(c.divergent_judges, vec!["c".to_string()]);
        assert!(c.disagreement);
        assert_eq!(c.judges.len(), 3);
        assert_eq!(c.spreads["code_quality"], 7.0);
    }

    #[test]
    fn test_order_independent() {
        let forward = vec![uniform("a", 3.0), uniform("b", 7.0), uniform("c", 8.0)];
        let mut reversed = forward.clone();
        reversed.reverse();
        assert_eq!(
            reduce_consensus(&forward, &dims(), 3.0),
            reduce_consensus(&reversed, &dims(), 3.0)
        );
    }

    #[test]
    fn test_even_count_averages_middle() {
        let scores = vec![uniform("a", 6.0), uniform("b", 8.0)];
        let c = reduce_consensus(&scores, &dims(), 3.0);
        assert_eq!(c.consensus().unwrap().get("output_quality"), Some(7.0));
        assert!(!c.consensus().unwrap().disagreement);
    }

    #[test]
    fn test_no_scores_unavailable() {
        assert!(!reduce_consensus(&[], &dims(), 3.0).is_available());
    }

    #[tokio::test]
    async fn test_one_failure_excluded() {
        let arbitrator = MultiJudgeArbitrator::new(
            vec![
                FakeJudge::arc("a", Behavior::Score(8.0)),
                FakeJudge::arc("b", Behavior::Malformed),
                FakeJudge::arc("c", Behavior::Score(6.0)),
            ],
            Duration::from_secs(5),
            3.0,
        );
        let outcome = arbitrator.arbitrate(&request()).await;
        assert_eq!(outcome.scores.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].judge_id, "b");
        let c = outcome.consensus.consensus().unwrap();
        assert_eq!(c.get("code_quality"), Some(7.0));
        // The rejected answer was still paid for.
        assert_eq!(outcome.failures[0].cost_usd, 0.01);
        assert!((outcome.cost_usd - 0.03).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_timeout_isolated() {
        let arbitrator = MultiJudgeArbitrator::new(
            vec![
                FakeJudge::arc("fast", Behavior::Score(5.0)),
                FakeJudge::arc("slow", Behavior::Hang),
            ],
            Duration::from_millis(100),
            3.0,
        );
        let outcome = arbitrator.arbitrate(&request()).await;
        assert_eq!(outcome.scores.len(), 1);
        assert!(outcome.failures[0].error.contains("timed out"));
        assert_eq!(outcome.failures[0].cost_usd, 0.0);
        assert!(outcome.consensus.is_available());
    }

    #[tokio::test]
    async fn test_all_failed_unavailable() {
        let arbitrator = MultiJudgeArbitrator::new(
            vec![
                FakeJudge::arc("a", Behavior::Malformed),
                FakeJudge::arc("b", Behavior::Malformed),
            ],
            Duration::from_secs(5),
            3.0,
        );
        let outcome = arbitrator.arbitrate(&request()).await;
        assert!(matches!(
            outcome.consensus,
            ConsensusScore::Unavailable { .. }
        ));
        assert_eq!(outcome.failures.len(), 2);
    }

    #[test]
    fn test_consensus_serializes_with_status() {
        let json = serde_json::to_value(ConsensusScore::unavailable("no judges")).unwrap();
        assert_eq!(json["status"], "UNAVAILABLE");
        assert_eq!(json["reason"], "no judges");
    }
}
