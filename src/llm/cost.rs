//! Judge cost estimation and tracking.
//!
//! Costs are tracked internally in micro-dollars to avoid floating-point
//! drift when summing many small judge calls. Public methods accept and
//! return dollar amounts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::litellm::Usage;

const MICROS_PER_DOLLAR: f64 = 1_000_000.0;
const TOKENS_PER_MILLION: f64 = 1_000_000.0;

/// Per-million-token prices in dollars.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// Dollar cost of one call.
    pub fn cost(&self, usage: &Usage) -> f64 {
        let cost = f64::from(usage.prompt_tokens) / TOKENS_PER_MILLION * self.input_per_million
            + f64::from(usage.completion_tokens) / TOKENS_PER_MILLION * self.output_per_million;
        (cost * MICROS_PER_DOLLAR).round() / MICROS_PER_DOLLAR
    }
}

/// Mid-tier fallback for unknown models.
pub const DEFAULT_PRICING: ModelPricing = ModelPricing::new(3.0, 15.0);

/// OpenRouter rates for the judge models in use.
const PRICING_TABLE: &[(&str, ModelPricing)] = &[
    ("claude-opus-4.5", ModelPricing::new(5.0, 25.0)),
    ("claude-opus-4-5", ModelPricing::new(5.0, 25.0)),
    ("claude-sonnet-4", ModelPricing::new(3.0, 15.0)),
    ("gpt-4o", ModelPricing::new(3.0, 10.0)),
    ("gemini-3-flash", ModelPricing::new(0.075, 0.30)),
    ("gemini-2.0-flash", ModelPricing::new(0.075, 0.30)),
];

/// Pricing for `model`, matched on the model name with any provider prefix.
pub fn pricing_for(model: &str) -> ModelPricing {
    let lowered = model.to_lowercase();
    let name = lowered.rsplit('/').next().unwrap_or(&lowered);
    PRICING_TABLE
        .iter()
        .find(|(key, _)| name.starts_with(key))
        .map(|(_, pricing)| *pricing)
        .unwrap_or(DEFAULT_PRICING)
}

/// Dollar cost of one call to `model`.
pub fn estimate_cost(model: &str, usage: &Usage) -> f64 {
    pricing_for(model).cost(usage)
}

/// Summary of judge spend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    pub total_usd: f64,
    pub calls: usize,
    pub by_model: HashMap<String, f64>,
}

/// Accumulates judge spend across a session. Safe to share between tasks.
#[derive(Debug, Default)]
pub struct CostTracker {
    total_micros: AtomicU64,
    calls: AtomicUsize,
    by_model: RwLock<HashMap<String, u64>>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call and return its dollar cost.
    pub fn record(&self, model: &str, usage: &Usage) -> f64 {
        let cost = estimate_cost(model, usage);
        let micros = dollars_to_micros(cost);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut by_model) = self.by_model.write() {
            *by_model.entry(model.to_string()).or_insert(0) += micros;
        }
        cost
    }

    pub fn total_usd(&self) -> f64 {
        micros_to_dollars(self.total_micros.load(Ordering::Relaxed))
    }

    pub fn report(&self) -> CostReport {
        let by_model = self
            .by_model
            .read()
            .map(|m| {
                m.iter()
                    .map(|(k, v)| (k.clone(), micros_to_dollars(*v)))
                    .collect()
            })
            .unwrap_or_default();
        CostReport {
            total_usd: self.total_usd(),
            calls: self.calls.load(Ordering::Relaxed),
            by_model,
        }
    }
}

fn dollars_to_micros(dollars: f64) -> u64 {
    (dollars * MICROS_PER_DOLLAR).round().max(0.0) as u64
}

fn micros_to_dollars(micros: u64) -> f64 {
    micros as f64 / MICROS_PER_DOLLAR
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(input: u32, output: u32) -> Usage {
        Usage {
            prompt_tokens: input,
            completion_tokens: output,
            total_tokens: input + output,
        }
    }

    #[test]
    fn test_pricing_lookup() {
        assert_eq!(pricing_for("anthropic/claude-opus-4.5"), ModelPricing::new(5.0, 25.0));
        assert_eq!(pricing_for("openai/gpt-4o"), ModelPricing::new(3.0, 10.0));
        assert_eq!(
            pricing_for("google/gemini-3-flash-preview"),
            ModelPricing::new(0.075, 0.30)
        );
        assert_eq!(pricing_for("mystery/model"), DEFAULT_PRICING);
    }

    #[test]
    fn test_estimate_cost() {
        // 10k in at $3/M + 1k out at $10/M = 0.03 + 0.01
        let cost = estimate_cost("openai/gpt-4o", &usage(10_000, 1_000));
        assert!((cost - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_tracker_accumulates() {
        let tracker = CostTracker::new();
        tracker.record("openai/gpt-4o", &usage(10_000, 1_000));
        tracker.record("anthropic/claude-opus-4.5", &usage(1_000_000, 0));

        let report = tracker.report();
        assert_eq!(report.calls, 2);
        assert!((report.total_usd - 5.04).abs() < 1e-6);
        assert!((report.by_model["anthropic/claude-opus-4.5"] - 5.0).abs() < 1e-6);
    }
}
