//! LLM integration for vibe-eval.
//!
//! Judges use an OpenAI-compatible chat-completions client. Spend is
//! estimated per call from a pricing table and accumulated per session.
//!
//! ```ignore
//! use vibe_eval::llm::{api_key_from_env, GenerationRequest, LiteLlmClient, LlmProvider, Message, OPENROUTER_API_BASE};
//!
//! let client = LiteLlmClient::new(OPENROUTER_API_BASE, api_key_from_env(), Duration::from_secs(120))?;
//! let request = GenerationRequest::new("openai/gpt-4o", vec![Message::user("Score this")])
//!     .with_temperature(0.0);
//! let response = client.generate(request).await?;
//! ```

pub mod cost;
pub mod litellm;

pub use cost::{estimate_cost, pricing_for, CostReport, CostTracker, ModelPricing};
pub use litellm::{
    api_key_from_env, Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider,
    Message, Usage, OPENROUTER_API_BASE,
};
