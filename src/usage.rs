//! Token accounting and cost estimation across calls.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::logging::short_type_name;
use crate::types::TokenUsage;

/// Price of one model in USD per 1K tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl Price {
    pub fn new(prompt_per_1k: f64, completion_per_1k: f64) -> Self {
        Self {
            prompt_per_1k,
            completion_per_1k,
        }
    }

    /// Estimated cost in USD for the given token counts.
    pub fn estimate(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / 1000.0) * self.prompt_per_1k
            + (completion_tokens as f64 / 1000.0) * self.completion_per_1k
    }
}

/// Per-model price table.
///
/// Lookups try the exact model name first, then the longest configured name the
/// model starts with, so dated snapshots such as `gpt-5-nano-2025-08-07` are priced
/// as `gpt-5-nano`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelPricing {
    prices: HashMap<String, Price>,
}

impl ModelPricing {
    /// Empty table; every model is unpriced.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Table seeded with the default models of each provider.
    pub fn with_defaults() -> Self {
        Self::empty()
            .with_price("gpt-5-nano", Price::new(0.05, 0.40))
            .with_price("claude-3-haiku-20240307", Price::new(0.25, 1.25))
            .with_price("gemini-2.0-flash-lite", Price::new(0.07, 0.30))
    }

    pub fn with_price(mut self, model: impl Into<String>, price: Price) -> Self {
        self.set(model, price);
        self
    }

    pub fn set(&mut self, model: impl Into<String>, price: Price) {
        self.prices.insert(model.into(), price);
    }

    pub fn get(&self, model: &str) -> Option<Price> {
        if let Some(price) = self.prices.get(model) {
            return Some(*price);
        }
        self.prices
            .iter()
            .filter(|(name, _)| model.starts_with(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, price)| *price)
    }

    /// Estimated cost of `usage` on `model`, or `None` when the model is unpriced.
    pub fn cost(&self, model: &str, usage: &TokenUsage) -> Option<f64> {
        self.get(model).map(|price| {
            price.estimate(
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
            )
        })
    }
}

/// Totals for one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost_usd: f64,
}

impl ModelUsage {
    fn add(&mut self, usage: &TokenUsage, cost: f64) {
        self.calls += 1;
        self.prompt_tokens += usage.prompt_tokens.unwrap_or(0);
        self.completion_tokens += usage.completion_tokens.unwrap_or(0);
        self.total_tokens += usage.total();
        self.estimated_cost_usd += cost;
    }
}

/// Snapshot returned by [`UsageTracker::summary`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Cost of priced models only, rounded to six decimals.
    pub estimated_cost_usd: f64,
    pub by_model: BTreeMap<String, ModelUsage>,
}

/// Thread-safe accumulator of token usage, shared between models via `Arc`.
///
/// ```
/// use langchain_llm::types::TokenUsage;
/// use langchain_llm::usage::UsageTracker;
///
/// let tracker = UsageTracker::new();
/// tracker.record("gpt-5-nano", &TokenUsage::new(1000, 500));
/// let summary = tracker.summary();
/// assert_eq!(summary.total_tokens, 1500);
/// assert_eq!(summary.estimated_cost_usd, 0.25);
/// ```
#[derive(Debug)]
pub struct UsageTracker {
    pricing: ModelPricing,
    by_model: Mutex<BTreeMap<String, ModelUsage>>,
}

impl UsageTracker {
    /// Tracker priced with [`ModelPricing::with_defaults`].
    pub fn new() -> Self {
        Self::with_pricing(ModelPricing::with_defaults())
    }

    pub fn with_pricing(pricing: ModelPricing) -> Self {
        Self {
            pricing,
            by_model: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn pricing(&self) -> &ModelPricing {
        &self.pricing
    }

    /// Adds one call's usage under `model`.
    pub fn record(&self, model: &str, usage: &TokenUsage) {
        let cost = self.pricing.cost(model, usage);
        debug!(
            context = short_type_name::<Self>(),
            model,
            total_tokens = usage.total(),
            cost = ?cost,
            "recorded usage"
        );
        let mut by_model = self.by_model.lock().unwrap_or_else(PoisonError::into_inner);
        by_model
            .entry(model.to_string())
            .or_default()
            .add(usage, cost.unwrap_or(0.0));
    }

    pub fn summary(&self) -> UsageSummary {
        let by_model = self
            .by_model
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut summary = UsageSummary::default();
        for usage in by_model.values() {
            summary.calls += usage.calls;
            summary.prompt_tokens += usage.prompt_tokens;
            summary.completion_tokens += usage.completion_tokens;
            summary.total_tokens += usage.total_tokens;
            summary.estimated_cost_usd += usage.estimated_cost_usd;
        }
        summary.estimated_cost_usd = (summary.estimated_cost_usd * 1e6).round() / 1e6;
        summary.by_model = by_model;
        summary
    }

    pub fn reset(&self) {
        self.by_model
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}
