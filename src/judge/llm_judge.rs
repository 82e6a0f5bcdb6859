//! LLM-backed judge.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::code::format_code_files;
use super::parse::{parse_judge_response, JudgeParse};
use super::types::{JudgeRequest, JudgeScore};
use crate::error::JudgeError;
use crate::llm::{estimate_cost, CostTracker, GenerationRequest, LlmProvider, Message};

/// System prompt shared by every judge.
const SYSTEM_PROMPT: &str = r#"You are an expert code reviewer evaluating a program written by an AI coding agent against a user's specification.

Be strict. Most submissions deserve 4-7. Reserve 9-10 for work that is genuinely excellent with nothing missing.

Score anchors (0-10):
- 0-2: broken, missing, or unrelated to the request
- 3-4: major features missing or wrong
- 5-6: works in part, noticeable gaps
- 7-8: solid, minor issues only
- 9-10: complete, correct and polished

Judge only what is in the code. Do not reward comments that claim features the code does not implement.

Respond with a single JSON object and nothing else."#;

/// A scorer for one RunTarget. Implementations must be independent: a judge
/// never sees another judge's output.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Stable identifier used in results and logs.
    fn id(&self) -> &str;

    /// Model (or backend) behind this judge.
    fn model(&self) -> &str;

    async fn score(&self, request: &JudgeRequest) -> Result<JudgeScore, JudgeError>;
}

/// Build the user prompt for `request`.
pub fn build_judge_prompt(request: &JudgeRequest) -> String {
    let dimensions = request
        .dimensions
        .iter()
        .map(|d| format!("- {}: {}", d.name, d.description))
        .collect::<Vec<_>>()
        .join("\n");
    let example = request
        .dimensions
        .iter()
        .map(|d| format!("  \"{}\": {{\"score\": <0-10>, \"reason\": \"...\"}}", d.name))
        .collect::<Vec<_>>()
        .join(",\n");

    format!(
        "## Specification\n\n{spec}\n\n## Submitted code\n\n{code}\n\n## Dimensions\n\n{dimensions}\n\n\
         Score every dimension. Answer with exactly this JSON shape:\n{{\n{example}\n}}",
        spec = request.spec.trim(),
        code = format_code_files(&request.files),
        dimensions = dimensions,
        example = example,
    )
}

/// Judge backed by an OpenAI-compatible chat model.
pub struct LlmJudge {
    id: String,
    model: String,
    provider: Arc<dyn LlmProvider>,
    temperature: f64,
    max_tokens: u32,
    costs: Option<Arc<CostTracker>>,
}

impl LlmJudge {
    pub fn new(id: impl Into<String>, model: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            provider,
            temperature: 0.0,
            max_tokens: 2000,
            costs: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Record every call's spend on `tracker`.
    pub fn with_cost_tracker(mut self, tracker: Arc<CostTracker>) -> Self {
        self.costs = Some(tracker);
        self
    }
}

#[async_trait]
impl Judge for LlmJudge {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn score(&self, request: &JudgeRequest) -> Result<JudgeScore, JudgeError> {
        let started = Instant::now();
        let generation = GenerationRequest::new(
            self.model.clone(),
            vec![
                Message::system(SYSTEM_PROMPT),
                Message::user(build_judge_prompt(request)),
            ],
        )
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens);

        let response = self.provider.generate(generation).await?;
        let usage = response.usage;
        // Spend is recorded even when the answer turns out to be unusable.
        let cost_usd = match &self.costs {
            Some(tracker) => tracker.record(&self.model, &usage),
            None => estimate_cost(&self.model, &usage),
        };

        let content = response
            .first_content()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(JudgeError::EmptyResponse { cost_usd })?;

        match parse_judge_response(content, &request.dimension_names()) {
            JudgeParse::Score(scores) => Ok(JudgeScore {
                judge_id: self.id.clone(),
                model: self.model.clone(),
                scores,
                latency_ms: started.elapsed().as_millis() as u64,
                usage,
                cost_usd,
            }),
            JudgeParse::ParseFailure { reason } => {
                tracing::debug!(judge = %self.id, reason = %reason, "Judge response rejected");
                Err(JudgeError::Malformed { reason, cost_usd })
            }
        }
    }
}
