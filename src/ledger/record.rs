//! The persisted unit of work: one scored RunTarget.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::ArtifactKind;
use crate::judge::{ConsensusScore, JudgeFailure, JudgeScore};
use crate::scoring::ScoreBreakdown;
use crate::test_runner::TestResult;
use crate::validation::ExecutionVerdict;

/// File in a workspace that carries generation metadata.
pub const RUN_METADATA_FILE: &str = "run_metadata.json";

/// Resume key: (case_id, model_id).
pub type RunKey = (String, String);

/// Generation-side metadata passed through to the ledger untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_cost_usd: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RunMetadata {
    /// Read `run_metadata.json` from `workspace`. A missing or unreadable
    /// file yields empty metadata.
    pub fn load(workspace: &Path) -> Self {
        let path = workspace.join(RUN_METADATA_FILE);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed run metadata");
                Self::default()
            }
        }
    }
}

/// Everything known about one evaluated RunTarget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredResult {
    pub run_id: Uuid,
    pub case_id: String,
    pub model_id: String,
    pub kind: Option<ArtifactKind>,
    pub verdict: ExecutionVerdict,
    pub tests: Option<TestResult>,
    pub consensus: ConsensusScore,
    #[serde(default)]
    pub judge_scores: Vec<JudgeScore>,
    #[serde(default)]
    pub judge_failures: Vec<JudgeFailure>,
    pub score: ScoreBreakdown,
    #[serde(default)]
    pub metadata: RunMetadata,
    #[serde(default)]
    pub judge_cost_usd: f64,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl ScoredResult {
    pub fn key(&self) -> RunKey {
        (self.case_id.clone(), self.model_id.clone())
    }
}
