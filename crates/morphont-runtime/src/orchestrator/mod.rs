//! Run orchestration.
//!
//! A run moves through the stages of a [`TransitionTable`]:
//! query formulation, evidence gathering, then synthesis and validation until
//! the candidate is valid ([`Stage::Finalize`]) or the iteration budget is
//! spent ([`Stage::Exhausted`]). Two strategies implement [`Orchestrator`]:
//! - [`SinglePassOrchestrator`]: one synthesis, one validation, no repair
//! - [`RepairLoopOrchestrator`]: repairs invalid candidates up to `max_iters`
//!
//! Both return the same [`RunOutcome`], so callers never care which one ran.
//! Every search and every synthesis attempt is written through to the cache
//! store as it happens; the outcome itself is transient.

use async_trait::async_trait;
use morphont_core::{CandidateDocument, ConceptSpec, OntologyDocument, ValidationReport, ValidationRules};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{RuntimeConfig, Strategy};
use crate::evidence::ProviderError;
use crate::prompts::DatasetContext;
use crate::records::Source;
use crate::store::StorageError;
use crate::synthesis::SynthesisError;

mod builder;
mod pipeline;
mod repair_loop;
mod single_pass;
mod trace;
mod transitions;

pub use builder::OrchestratorBuilder;
pub use repair_loop::RepairLoopOrchestrator;
pub use single_pass::SinglePassOrchestrator;
pub use trace::{RunTrace, TraceEvent};
pub use transitions::{Stage, TransitionTable};

/// Errors that abort a run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("evidence provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("cache store failed: {0}")]
    Storage(#[from] StorageError),

    #[error("no synthesis attempt produced a candidate: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("run cancelled")]
    Cancelled,

    #[error("invalid run request: {0}")]
    InvalidRequest(String),

    #[error("orchestrator not configured: {0}")]
    NotConfigured(String),
}

/// Cooperative cancellation, checked before every transition.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<(), RunError> {
        if self.is_cancelled() {
            Err(RunError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// One ontology to build.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub context: DatasetContext,

    /// Search keywords; derived from the dataset and classes when empty
    pub keywords: Vec<String>,

    /// Evidence sources; the configured ones when unset
    pub sources: Option<Vec<Source>>,

    pub cancel: CancellationFlag,
}

impl RunRequest {
    pub fn new(context: DatasetContext) -> Self {
        Self {
            context,
            ..Self::default()
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Keywords to search for, in order and without repeats.
    pub fn search_keywords(&self) -> Vec<String> {
        let dataset = self.context.dataset.trim();
        let derived: Vec<String> = if !self.keywords.is_empty() {
            self.keywords.iter().map(|k| k.trim().to_string()).collect()
        } else if !self.context.classes.is_empty() {
            self.context
                .classes
                .iter()
                .map(|class| format!("{} {}", dataset, class.trim()))
                .collect()
        } else {
            vec![dataset.to_string()]
        };

        let mut keywords: Vec<String> = Vec::with_capacity(derived.len());
        for keyword in derived {
            if !keyword.is_empty() && !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
        keywords
    }
}

/// What a run produced. The shape is the same for every strategy.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// `Finalize` or `Exhausted`
    pub terminal: Stage,

    /// The finished ontology; only set on `Finalize`
    pub document: Option<OntologyDocument>,

    /// The accepted candidate, or the best one when exhausted
    pub candidate: CandidateDocument,

    /// Report for `candidate`
    pub report: ValidationReport,

    /// Synthesis attempts made, failed ones included
    pub attempts: u32,

    /// Evidence documents the run synthesized from
    pub evidence: usize,

    pub trace: RunTrace,

    /// Search record all of the run's extraction records hang off
    pub anchor_search_id: i64,
}

impl RunOutcome {
    pub fn is_final(&self) -> bool {
        self.terminal == Stage::Finalize
    }

    /// The concepts of the outcome, whether finalized or best effort.
    pub fn concepts(&self) -> Vec<ConceptSpec> {
        match &self.document {
            Some(document) => document.concepts.clone(),
            None => self.candidate.parse().concepts,
        }
    }
}

/// A synthesis-and-repair strategy.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    fn strategy(&self) -> Strategy;

    /// Execute one run to a terminal stage.
    async fn run(&self, request: &RunRequest) -> Result<RunOutcome, RunError>;
}

/// Run independent requests concurrently. Results come back in request order.
pub async fn run_all(
    orchestrator: &dyn Orchestrator,
    requests: &[RunRequest],
) -> Vec<Result<RunOutcome, RunError>> {
    futures::future::join_all(requests.iter().map(|request| orchestrator.run(request))).await
}

/// Run parameters that do not vary per request.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    /// Sources queried when the request names none
    pub sources: Vec<Source>,

    pub max_results: u32,

    /// Evidence documents kept per run
    pub max_documents: usize,

    /// Serve repeated queries from the cache store
    pub reuse_searches: bool,

    /// Validation rules; the request's classes are filled in per run
    pub rules: ValidationRules,

    /// Version stamped on finalized documents that carry none
    pub version: String,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            sources: vec![Source::Pubmed],
            max_results: 20,
            max_documents: 20,
            reuse_searches: true,
            rules: ValidationRules::default(),
            version: "1".to_string(),
        }
    }
}

impl From<&RuntimeConfig> for RunSettings {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            sources: config.evidence.sources.clone(),
            max_results: config.evidence.max_results,
            max_documents: config.evidence.max_documents,
            reuse_searches: config.cache.reuse_searches,
            rules: ValidationRules {
                classes: Vec::new(),
                min_concepts_per_class: config.orchestrator.min_concepts_per_class,
                min_positives: config.orchestrator.min_positives,
                min_negatives: config.orchestrator.min_negatives,
            },
            ..Self::default()
        }
    }
}
