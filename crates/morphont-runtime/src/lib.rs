//! # morphont-runtime
//!
//! Evidence gathering, LLM synthesis and repair orchestration for morphont.
//!
//! This crate does everything `morphont-core` refuses to: it talks to
//! literature backends and language models, and it persists what it sees.
//! A run goes query formulation, evidence gathering, synthesis, validation,
//! and then either finalizes or repairs:
//!
//! - [`store`]: append-only SQLite cache of searches, results and attempts
//! - [`evidence`]: literature providers behind a retrying [`EvidenceGateway`]
//! - [`synthesis`]: candidate generation through an injected [`Synthesizer`]
//! - [`orchestrator`]: single-pass and repair-loop strategies
//!
//! ## Important
//!
//! Validation is never done here; every candidate is judged by
//! [`morphont_core::Validator`]. Components take explicit configuration and
//! never read the process environment.
//!
//! ## Example
//!
//! ```rust,ignore
//! use morphont_runtime::{DatasetContext, OrchestratorBuilder, RunRequest, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_file("morphont.yaml")?;
//! let orchestrator = OrchestratorBuilder::from_config(&config)
//!     .store(store)
//!     .gateway(gateway)
//!     .synthesizer(synthesizer)
//!     .build()?;
//!
//! let request = RunRequest::new(DatasetContext::new("BRACS").with_classes(["DCIS", "Normal"]));
//! let outcome = orchestrator.run(&request).await?;
//! if let Some(document) = outcome.document {
//!     println!("{}", document.to_json_pretty()?);
//! }
//! ```

pub mod artifact;
pub mod cache;
pub mod config;
pub mod evidence;
pub mod llm;
pub mod orchestrator;
pub mod prompts;
pub mod records;
pub mod resilience;
pub mod store;
pub mod synthesis;

pub use artifact::{write_artifact, ArtifactError, WrittenArtifact};
pub use cache::DocumentCache;
pub use config::{ConfigError, RuntimeConfig, Strategy};
pub use evidence::{
    EvidenceGateway, EvidenceProvider, EvidenceRegistry, ProviderError, ProviderFault, RawDocument,
    RawHit, StaticProvider,
};
pub use llm::{LlmError, LlmProvider, ProviderRegistry};
pub use orchestrator::{
    run_all, CancellationFlag, Orchestrator, OrchestratorBuilder, RunError, RunOutcome, RunRequest,
    RunSettings, RunTrace, Stage,
};
pub use prompts::{DatasetContext, PromptTemplate};
pub use records::{ExtractionRecord, Query, ResultRecord, SearchRecord, Source};
pub use resilience::{BudgetTracker, RetryPolicy};
pub use store::{CacheStore, SqliteCacheStore, StorageError};
pub use synthesis::{LlmSynthesizer, SynthesisEngine, SynthesisError, Synthesizer};
