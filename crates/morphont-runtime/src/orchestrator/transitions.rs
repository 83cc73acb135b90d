//! Orchestration stages and the table that moves a run between them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named stage of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    QueryFormulation,
    EvidenceGathering,
    Synthesis,
    Validation,
    Repair,
    Finalize,
    Exhausted,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::QueryFormulation => "query_formulation",
            Stage::EvidenceGathering => "evidence_gathering",
            Stage::Synthesis => "synthesis",
            Stage::Validation => "validation",
            Stage::Repair => "repair",
            Stage::Finalize => "finalize",
            Stage::Exhausted => "exhausted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Finalize | Stage::Exhausted)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition rules shared by every strategy.
///
/// `iterations` is the number of synthesis attempts made so far, failed ones
/// included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionTable {
    repair_enabled: bool,
    max_iters: u32,
}

impl TransitionTable {
    /// One synthesis attempt, no repair.
    pub fn single_pass() -> Self {
        Self {
            repair_enabled: false,
            max_iters: 1,
        }
    }

    /// Up to `max_iters` attempts; zero is treated as one.
    pub fn repair_loop(max_iters: u32) -> Self {
        Self {
            repair_enabled: true,
            max_iters: max_iters.max(1),
        }
    }

    pub fn max_iters(&self) -> u32 {
        self.max_iters
    }

    pub fn repair_enabled(&self) -> bool {
        self.repair_enabled
    }

    /// Whether another attempt may follow the `iterations`-th one.
    pub fn can_repair(&self, iterations: u32) -> bool {
        self.repair_enabled && iterations < self.max_iters
    }

    /// The stage after `from`. `valid` only matters when leaving validation.
    /// Terminal stages map to themselves.
    pub fn next(&self, from: Stage, valid: bool, iterations: u32) -> Stage {
        match from {
            Stage::QueryFormulation => Stage::EvidenceGathering,
            Stage::EvidenceGathering => Stage::Synthesis,
            Stage::Synthesis => Stage::Validation,
            Stage::Validation if valid => Stage::Finalize,
            Stage::Validation if self.can_repair(iterations) => Stage::Repair,
            Stage::Validation => Stage::Exhausted,
            Stage::Repair => Stage::Synthesis,
            Stage::Finalize => Stage::Finalize,
            Stage::Exhausted => Stage::Exhausted,
        }
    }

    /// The stage after a synthesis attempt that produced nothing.
    pub fn after_failure(&self, iterations: u32) -> Stage {
        if self.can_repair(iterations) {
            Stage::Repair
        } else {
            Stage::Exhausted
        }
    }
}
