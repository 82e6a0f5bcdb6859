//! LLM judges and multi-judge arbitration.
//!
//! A [`JudgeRequest`] carries the case spec, the collected workspace code and
//! the dimensions to score. Each [`Judge`] answers independently; the
//! [`MultiJudgeArbitrator`] dispatches them concurrently and reduces the
//! surviving answers to a per-dimension median [`ConsensusScore`].

pub mod arbitrator;
pub mod code;
pub mod llm_judge;
pub mod parse;
pub mod types;

pub use arbitrator::{
    reduce_consensus, ArbitrationOutcome, Consensus, ConsensusScore, MultiJudgeArbitrator,
};
pub use code::{collect_code_files, format_code_files, CodeFile};
pub use llm_judge::{build_judge_prompt, Judge, LlmJudge};
pub use parse::{parse_judge_response, JudgeParse};
pub use types::{
    default_dimensions, DimensionScore, JudgeDimension, JudgeFailure, JudgeRequest, JudgeScore,
};
