//! Token budget management for LLM calls.
//!
//! Every call draws from the global token budget; repair calls also draw
//! from a separate repair budget.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::llm::TokenUsage;

/// Which kind of synthesis call is being budgeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Synthesis,
    Repair,
}

/// Token budget for a scope.
pub struct TokenBudget {
    /// Maximum tokens allowed
    pub max_tokens: u32,

    used: AtomicU32,
}

impl TokenBudget {
    pub fn new(max_tokens: u32) -> Self {
        Self {
            max_tokens,
            used: AtomicU32::new(0),
        }
    }

    pub fn can_afford(&self, tokens: u32) -> bool {
        self.remaining() >= tokens
    }

    pub fn record(&self, tokens: u32) {
        self.used.fetch_add(tokens, Ordering::SeqCst);
    }

    pub fn remaining(&self) -> u32 {
        self.max_tokens.saturating_sub(self.used.load(Ordering::SeqCst))
    }

    pub fn used(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.used.store(0, Ordering::SeqCst);
    }
}

/// Accumulated LLM usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub total_tokens: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,

    /// Number of LLM calls made
    pub llm_calls: u32,

    /// Calls that were repairs
    pub repair_calls: u32,

    /// Estimated cost in USD
    pub estimated_cost: f64,

    pub cache_creation_tokens: u32,
    pub cache_read_tokens: u32,
}

impl LlmUsage {
    /// Add token usage from a provider response.
    pub fn add(&mut self, usage: &TokenUsage, model: &str, kind: CallKind) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total();
        self.llm_calls += 1;
        if kind == CallKind::Repair {
            self.repair_calls += 1;
        }
        self.cache_creation_tokens += usage.cache_creation_tokens;
        self.cache_read_tokens += usage.cache_read_tokens;
        self.estimated_cost += Self::estimate_cost(usage, model);
    }

    /// Estimate cost for a usage entry.
    fn estimate_cost(usage: &TokenUsage, model: &str) -> f64 {
        // USD per million tokens: input, output, cache write, cache read
        let (input_rate, output_rate, cache_write_rate, cache_read_rate) = match model {
            m if m.contains("sonnet-4-5") => (3.0, 15.0, 3.75, 0.3),
            m if m.contains("opus-4-5") => (5.0, 25.0, 6.25, 0.5),
            m if m.contains("haiku-4-5") => (1.0, 5.0, 1.25, 0.1),
            m if m.contains("gpt-4o-mini") => (0.15, 0.6, 0.0, 0.075),
            m if m.contains("gpt-4o") => (2.5, 10.0, 0.0, 1.25),
            _ => (3.0, 15.0, 3.75, 0.3),
        };

        let per_token = |tokens: u32, rate: f64| (tokens as f64 / 1_000_000.0) * rate;
        per_token(usage.prompt_tokens, input_rate)
            + per_token(usage.completion_tokens, output_rate)
            + per_token(usage.cache_creation_tokens, cache_write_rate)
            + per_token(usage.cache_read_tokens, cache_read_rate)
    }
}

/// Budget tracker for synthesis calls.
pub struct BudgetTracker {
    global_budget: TokenBudget,
    repair_budget: TokenBudget,
    usage: RwLock<LlmUsage>,
}

impl BudgetTracker {
    pub fn new(global_max: u32, repair_max: u32) -> Self {
        Self {
            global_budget: TokenBudget::new(global_max),
            repair_budget: TokenBudget::new(repair_max),
            usage: RwLock::new(LlmUsage::default()),
        }
    }

    /// Check if a call of `kind` estimated at `estimated_tokens` fits.
    pub fn can_afford(&self, kind: CallKind, estimated_tokens: u32) -> bool {
        let repair_ok = kind != CallKind::Repair || self.repair_budget.can_afford(estimated_tokens);
        repair_ok && self.global_budget.can_afford(estimated_tokens)
    }

    /// Record usage after a call.
    pub fn record_usage(&self, kind: CallKind, usage: &TokenUsage, model: &str) {
        let total = usage.total();
        if kind == CallKind::Repair {
            self.repair_budget.record(total);
        }
        self.global_budget.record(total);
        self.usage.write().add(usage, model, kind);
    }

    pub fn get_usage(&self) -> LlmUsage {
        self.usage.read().clone()
    }

    pub fn remaining_global(&self) -> u32 {
        self.global_budget.remaining()
    }

    pub fn remaining_repair(&self) -> u32 {
        self.repair_budget.remaining()
    }

    pub fn reset(&self) {
        self.global_budget.reset();
        self.repair_budget.reset();
        *self.usage.write() = LlmUsage::default();
    }
}

impl Default for BudgetTracker {
    fn default() -> Self {
        Self::new(200_000, 120_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: u32, completion: u32) -> TokenUsage {
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
        }
    }

    #[test]
    fn test_budget_enforcement() {
        let budget = TokenBudget::new(100);

        assert!(budget.can_afford(100));
        assert!(!budget.can_afford(101));

        budget.record(60);
        assert_eq!(budget.remaining(), 40);
        assert!(!budget.can_afford(50));
    }

    #[test]
    fn test_repair_draws_from_both_budgets() {
        let tracker = BudgetTracker::new(500, 100);

        tracker.record_usage(CallKind::Synthesis, &usage(200, 100), "claude-sonnet-4-5");
        assert_eq!(tracker.remaining_global(), 200);
        assert_eq!(tracker.remaining_repair(), 100);

        tracker.record_usage(CallKind::Repair, &usage(40, 20), "claude-sonnet-4-5");
        assert_eq!(tracker.remaining_global(), 140);
        assert_eq!(tracker.remaining_repair(), 40);

        assert!(tracker.can_afford(CallKind::Synthesis, 100));
        assert!(!tracker.can_afford(CallKind::Repair, 100));

        let totals = tracker.get_usage();
        assert_eq!(totals.llm_calls, 2);
        assert_eq!(totals.repair_calls, 1);
        assert_eq!(totals.total_tokens, 360);
    }

    #[test]
    fn test_cost_estimation() {
        let mut totals = LlmUsage::default();
        totals.add(&usage(1000, 500), "claude-sonnet-4-5", CallKind::Synthesis);

        // 1000 * $3/MTok + 500 * $15/MTok
        assert!(totals.estimated_cost > 0.01 && totals.estimated_cost < 0.02);
    }

    #[test]
    fn test_reset() {
        let tracker = BudgetTracker::new(100, 50);
        tracker.record_usage(CallKind::Repair, &usage(10, 10), "gpt-4o-mini");
        tracker.reset();
        assert_eq!(tracker.remaining_global(), 100);
        assert_eq!(tracker.get_usage(), LlmUsage::default());
    }
}
