//! Orchestrator construction.

use std::sync::Arc;

use super::pipeline::Pipeline;
use super::{Orchestrator, RepairLoopOrchestrator, RunError, RunSettings, SinglePassOrchestrator};
use crate::config::{RuntimeConfig, Strategy};
use crate::evidence::EvidenceGateway;
use crate::prompts::PromptTemplate;
use crate::store::CacheStore;
use crate::synthesis::Synthesizer;

/// Builder for either orchestrator strategy.
pub struct OrchestratorBuilder {
    store: Option<Arc<dyn CacheStore>>,
    gateway: Option<Arc<EvidenceGateway>>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    template: PromptTemplate,
    settings: RunSettings,
    strategy: Strategy,
    max_iters: u32,
}

impl OrchestratorBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            store: None,
            gateway: None,
            synthesizer: None,
            template: PromptTemplate::default(),
            settings: RunSettings::default(),
            strategy: Strategy::default(),
            max_iters: 3,
        }
    }

    /// Take run settings, strategy and iteration budget from configuration.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            settings: RunSettings::from(config),
            strategy: config.orchestrator.strategy,
            max_iters: config.orchestrator.max_iters,
            ..Self::new()
        }
    }

    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn gateway(mut self, gateway: impl Into<Arc<EvidenceGateway>>) -> Self {
        self.gateway = Some(gateway.into());
        self
    }

    pub fn synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn max_iters(mut self, max_iters: u32) -> Self {
        self.max_iters = max_iters;
        self
    }

    /// Build the configured strategy.
    pub fn build(self) -> Result<Arc<dyn Orchestrator>, RunError> {
        Ok(match self.strategy {
            Strategy::SinglePass => Arc::new(self.build_single_pass()?),
            Strategy::RepairLoop => Arc::new(self.build_repair_loop()?),
        })
    }

    pub fn build_single_pass(self) -> Result<SinglePassOrchestrator, RunError> {
        Ok(SinglePassOrchestrator::new(self.pipeline()?))
    }

    pub fn build_repair_loop(self) -> Result<RepairLoopOrchestrator, RunError> {
        let max_iters = self.max_iters;
        Ok(RepairLoopOrchestrator::new(self.pipeline()?, max_iters))
    }

    fn pipeline(self) -> Result<Pipeline, RunError> {
        let store = self
            .store
            .ok_or_else(|| RunError::NotConfigured("no cache store set".to_string()))?;
        let gateway = self
            .gateway
            .ok_or_else(|| RunError::NotConfigured("no evidence gateway set".to_string()))?;
        let synthesizer = self
            .synthesizer
            .ok_or_else(|| RunError::NotConfigured("no synthesizer set".to_string()))?;

        if self.max_iters == 0 {
            return Err(RunError::NotConfigured("max_iters must be at least 1".to_string()));
        }

        Ok(Pipeline::new(store, gateway, synthesizer, self.template, self.settings))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
