//! Single-pass strategy: one synthesis, one validation, never a repair.

use async_trait::async_trait;

use super::pipeline::Pipeline;
use super::{Orchestrator, RunError, RunOutcome, RunRequest, RunSettings, TransitionTable};
use crate::config::Strategy;

pub struct SinglePassOrchestrator {
    pipeline: Pipeline,
    table: TransitionTable,
}

impl SinglePassOrchestrator {
    pub(crate) fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            table: TransitionTable::single_pass(),
        }
    }

    pub fn settings(&self) -> &RunSettings {
        self.pipeline.settings()
    }
}

#[async_trait]
impl Orchestrator for SinglePassOrchestrator {
    fn strategy(&self) -> Strategy {
        Strategy::SinglePass
    }

    async fn run(&self, request: &RunRequest) -> Result<RunOutcome, RunError> {
        self.pipeline.drive(&self.table, request).await
    }
}
