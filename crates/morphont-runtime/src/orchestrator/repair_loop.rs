//! Multi-step strategy: repair invalid candidates until they validate or the
//! iteration budget runs out.

use async_trait::async_trait;

use super::pipeline::Pipeline;
use super::{Orchestrator, RunError, RunOutcome, RunRequest, RunSettings, TransitionTable};
use crate::config::Strategy;

pub struct RepairLoopOrchestrator {
    pipeline: Pipeline,
    table: TransitionTable,
}

impl RepairLoopOrchestrator {
    pub(crate) fn new(pipeline: Pipeline, max_iters: u32) -> Self {
        Self {
            pipeline,
            table: TransitionTable::repair_loop(max_iters),
        }
    }

    pub fn max_iters(&self) -> u32 {
        self.table.max_iters()
    }

    pub fn settings(&self) -> &RunSettings {
        self.pipeline.settings()
    }
}

#[async_trait]
impl Orchestrator for RepairLoopOrchestrator {
    fn strategy(&self) -> Strategy {
        Strategy::RepairLoop
    }

    async fn run(&self, request: &RunRequest) -> Result<RunOutcome, RunError> {
        self.pipeline.drive(&self.table, request).await
    }
}
