//! Resilience patterns for morphont-runtime.
//!
//! This module provides:
//! - Retry with backoff for evidence backends
//! - Token budget management for synthesis calls

mod budget;
mod retry;

pub use budget::{BudgetTracker, CallKind, LlmUsage, TokenBudget};
pub use retry::RetryPolicy;
