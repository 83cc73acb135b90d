//! Candidate synthesis.
//!
//! A [`Synthesizer`] turns evidence (and, for repairs, the previous attempt
//! with its validation report) into a raw candidate document. The
//! [`SynthesisEngine`] wraps one and records every attempt, successful or
//! not, in the cache store before handing the outcome back. Neither
//! validates anything.

use async_trait::async_trait;
use morphont_core::{CandidateDocument, ValidationReport};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;

use crate::evidence::RawDocument;
use crate::llm::{ChatMessage, CompletionConfig, LlmError, LlmProvider};
use crate::prompts::{self, DatasetContext, PromptTemplate};
use crate::records::{ExtractionRecord, SearchRecord};
use crate::resilience::{BudgetTracker, CallKind, LlmUsage};
use crate::store::{CacheStore, StorageError};

/// Errors from a single synthesis call. Each one costs the run an iteration.
#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("token budget exhausted for {kind:?} call: needs ~{estimated}, {remaining} left")]
    BudgetExceeded {
        kind: CallKind,
        estimated: u32,
        remaining: u32,
    },

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("synthesizer not configured: {0}")]
    NotConfigured(String),
}

/// The previous attempt, handed back for a repair.
#[derive(Debug, Clone, Copy)]
pub struct RepairFeedback<'a> {
    pub previous: &'a CandidateDocument,
    pub report: &'a ValidationReport,
}

/// Everything one synthesis call sees.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisRequest<'a> {
    pub template: &'a PromptTemplate,
    pub context: &'a DatasetContext,
    pub queries: &'a [String],
    pub evidence: &'a [RawDocument],
    pub feedback: Option<RepairFeedback<'a>>,
}

impl SynthesisRequest<'_> {
    pub fn kind(&self) -> CallKind {
        if self.feedback.is_some() {
            CallKind::Repair
        } else {
            CallKind::Synthesis
        }
    }
}

/// Produces candidate documents.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Name used in extraction records.
    fn name(&self) -> &str;

    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<CandidateDocument, SynthesisError>;
}

/// Synthesizer backed by an LLM provider.
pub struct LlmSynthesizer {
    provider: Arc<dyn LlmProvider>,
    config: CompletionConfig,
    budget: Arc<BudgetTracker>,
    max_documents: usize,
}

impl LlmSynthesizer {
    pub fn new(provider: Arc<dyn LlmProvider>, config: CompletionConfig) -> Self {
        Self {
            provider,
            config,
            budget: Arc::new(BudgetTracker::default()),
            max_documents: 20,
        }
    }

    pub fn with_budget(mut self, budget: Arc<BudgetTracker>) -> Self {
        self.budget = budget;
        self
    }

    /// Evidence documents included per prompt.
    pub fn with_max_documents(mut self, max_documents: usize) -> Self {
        self.max_documents = max_documents;
        self
    }

    pub fn usage(&self) -> LlmUsage {
        self.budget.get_usage()
    }

    pub fn budget(&self) -> &BudgetTracker {
        &self.budget
    }

    fn messages(&self, request: &SynthesisRequest<'_>) -> Vec<ChatMessage> {
        let system = request.template.render(request.context);
        let user = match &request.feedback {
            Some(feedback) => prompts::repair_prompt(
                feedback.previous,
                feedback.report,
                request.evidence,
                self.max_documents,
            ),
            None => prompts::synthesis_prompt(request.queries, request.evidence, self.max_documents),
        };
        vec![ChatMessage::system(system), ChatMessage::user(user)]
    }
}

#[async_trait]
impl Synthesizer for LlmSynthesizer {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<CandidateDocument, SynthesisError> {
        let kind = request.kind();
        let messages = self.messages(request);

        let estimated: u32 = messages
            .iter()
            .map(|m| self.provider.estimate_tokens(&m.content))
            .sum();
        if !self.budget.can_afford(kind, estimated) {
            let remaining = match kind {
                CallKind::Repair => self.budget.remaining_repair().min(self.budget.remaining_global()),
                CallKind::Synthesis => self.budget.remaining_global(),
            };
            return Err(SynthesisError::BudgetExceeded {
                kind,
                estimated,
                remaining,
            });
        }

        let response = self.provider.complete(messages, &self.config).await?;
        self.budget.record_usage(kind, &response.usage, &response.model);

        tracing::debug!(
            provider = self.provider.name(),
            model = %response.model,
            kind = ?kind,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "completion received"
        );

        if response.content.trim().is_empty() {
            return Err(SynthesisError::EmptyResponse);
        }
        Ok(CandidateDocument::new(response.content))
    }
}

/// Outcome of one recorded attempt.
#[derive(Debug)]
pub struct Attempt {
    pub kind: CallKind,
    pub outcome: Result<CandidateDocument, SynthesisError>,
    pub extraction: ExtractionRecord,
}

/// Runs a synthesizer and records each attempt under the run's anchor
/// search.
pub struct SynthesisEngine {
    synthesizer: Arc<dyn Synthesizer>,
    store: Arc<dyn CacheStore>,
}

impl SynthesisEngine {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, store: Arc<dyn CacheStore>) -> Self {
        Self { synthesizer, store }
    }

    pub fn synthesizer_name(&self) -> &str {
        self.synthesizer.name()
    }

    /// Synthesize once. Only a storage failure is an `Err`; synthesis
    /// failures come back inside the [`Attempt`].
    pub async fn run(
        &self,
        anchor: &SearchRecord,
        request: &SynthesisRequest<'_>,
    ) -> Result<Attempt, StorageError> {
        let kind = request.kind();
        let outcome = self.synthesizer.synthesize(request).await;

        let label = match (&outcome, kind) {
            (Err(_), _) => "failed",
            (Ok(_), CallKind::Synthesis) => "synthesis",
            (Ok(_), CallKind::Repair) => "repair",
        };
        let extractor = format!("{}:{}", self.synthesizer.name(), label);
        let content = extraction_content(kind, request, &outcome);

        let extraction = self.store.record_extraction(
            anchor.id,
            &extractor,
            &anchor.query.keyword,
            &content,
        )?;

        match &outcome {
            Ok(_) => tracing::info!(
                extractor = %extractor,
                extraction_id = extraction.id,
                search_id = anchor.id,
                "synthesis attempt recorded"
            ),
            Err(e) => tracing::warn!(
                extractor = %extractor,
                extraction_id = extraction.id,
                search_id = anchor.id,
                error = %e,
                "synthesis attempt failed"
            ),
        }

        Ok(Attempt {
            kind,
            outcome,
            extraction,
        })
    }
}

fn extraction_content(
    kind: CallKind,
    request: &SynthesisRequest<'_>,
    outcome: &Result<CandidateDocument, SynthesisError>,
) -> JsonValue {
    let evidence: Vec<&str> = request.evidence.iter().map(|d| d.id.as_str()).collect();
    let mut content = serde_json::json!({
        "kind": kind,
        "dataset": request.context.dataset,
        "queries": request.queries,
        "evidence": evidence,
    });

    if let Some(feedback) = &request.feedback {
        content["previous_errors"] = serde_json::to_value(&feedback.report.errors).unwrap_or(JsonValue::Null);
    }
    match outcome {
        Ok(candidate) => content["candidate"] = JsonValue::String(candidate.raw().to_string()),
        Err(e) => content["error"] = JsonValue::String(e.to_string()),
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionResponse, TokenUsage};
    use crate::records::{Query, Source};
    use crate::store::SqliteCacheStore;
    use morphont_core::{ErrorKind, ValidationIssue};
    use parking_lot::Mutex;

    /// Returns queued responses in order.
    struct ScriptedSynthesizer {
        responses: Mutex<Vec<Result<String, String>>>,
    }

    impl ScriptedSynthesizer {
        fn new(responses: Vec<Result<&str, &str>>) -> Self {
            let mut responses: Vec<Result<String, String>> = responses
                .into_iter()
                .map(|r| r.map(str::to_string).map_err(str::to_string))
                .collect();
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl Synthesizer for ScriptedSynthesizer {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn synthesize(&self, _request: &SynthesisRequest<'_>) -> Result<CandidateDocument, SynthesisError> {
            match self.responses.lock().pop() {
                Some(Ok(raw)) => Ok(CandidateDocument::new(raw)),
                Some(Err(msg)) => Err(SynthesisError::NotConfigured(msg)),
                None => Err(SynthesisError::EmptyResponse),
            }
        }
    }

    struct EchoProvider {
        content: String,
        usage: TokenUsage,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl EchoProvider {
        fn new(content: &str, prompt_tokens: u32, completion_tokens: u32) -> Self {
            Self {
                content: content.to_string(),
                usage: TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                    ..TokenUsage::default()
                },
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn complete(
            &self,
            messages: Vec<ChatMessage>,
            config: &CompletionConfig,
        ) -> Result<CompletionResponse, LlmError> {
            self.seen.lock().push(messages);
            Ok(CompletionResponse {
                content: self.content.clone(),
                usage: self.usage.clone(),
                model: config.model.clone(),
                stop_reason: None,
            })
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    fn anchor(store: &SqliteCacheStore) -> SearchRecord {
        store.record_search(&Query::new("BRACS DCIS", Source::Pubmed)).unwrap()
    }

    fn request<'a>(
        template: &'a PromptTemplate,
        context: &'a DatasetContext,
        feedback: Option<RepairFeedback<'a>>,
    ) -> SynthesisRequest<'a> {
        SynthesisRequest {
            template,
            context,
            queries: &[],
            evidence: &[],
            feedback,
        }
    }

    #[tokio::test]
    async fn test_engine_records_every_attempt() {
        let store = Arc::new(SqliteCacheStore::open_in_memory().unwrap());
        let anchor = anchor(&store);
        let synthesizer = Arc::new(ScriptedSynthesizer::new(vec![
            Ok(r#"{"concepts": []}"#),
            Err("no model"),
            Ok(r#"{"concepts": [{"id": "a", "name": "A", "definition": "x"}]}"#),
        ]));
        let engine = SynthesisEngine::new(synthesizer, store.clone());

        let template = PromptTemplate::default();
        let context = DatasetContext::new("BRACS");
        let previous = CandidateDocument::new(r#"{"concepts": []}"#);
        let report = ValidationReport::from_issues(vec![ValidationIssue::new(
            ErrorKind::Cardinality,
            "too few concepts",
        )]);
        let feedback = RepairFeedback {
            previous: &previous,
            report: &report,
        };

        let first = engine.run(&anchor, &request(&template, &context, None)).await.unwrap();
        let second = engine
            .run(&anchor, &request(&template, &context, Some(feedback)))
            .await
            .unwrap();
        let third = engine
            .run(&anchor, &request(&template, &context, Some(feedback)))
            .await
            .unwrap();

        assert!(first.outcome.is_ok());
        assert!(second.outcome.is_err());
        assert_eq!(third.kind, CallKind::Repair);

        let extractors: Vec<String> = store
            .extractions_for(anchor.id)
            .unwrap()
            .into_iter()
            .map(|e| e.extractor)
            .collect();
        assert_eq!(extractors, vec!["scripted:synthesis", "scripted:failed", "scripted:repair"]);

        assert_eq!(second.extraction.content["error"], "synthesizer not configured: no model");
        assert_eq!(third.extraction.content["previous_errors"][0]["kind"], "cardinality");
        assert_eq!(third.extraction.keyword, "BRACS DCIS");
    }

    #[tokio::test]
    async fn test_llm_synthesizer_builds_repair_prompt() {
        let provider = Arc::new(EchoProvider::new(r#"{"concepts": []}"#, 100, 20));
        let synthesizer = LlmSynthesizer::new(provider.clone(), CompletionConfig::default());

        let template = PromptTemplate::new("curate {{DATASET_NAME}}");
        let context = DatasetContext::new("BRACS");
        let previous = CandidateDocument::new(r#"{"concepts": [{"id": "dcis", "name": "DCIS", "definition": "x"}]}"#);
        let report = ValidationReport::from_issues(vec![ValidationIssue::new(
            ErrorKind::DanglingReference,
            "dcis: parent 'ghost' does not exist",
        )]);

        let candidate = synthesizer
            .synthesize(&request(
                &template,
                &context,
                Some(RepairFeedback {
                    previous: &previous,
                    report: &report,
                }),
            ))
            .await
            .unwrap();
        assert_eq!(candidate.raw(), r#"{"concepts": []}"#);

        let seen = provider.seen.lock();
        assert_eq!(seen[0][0].content, "curate BRACS");
        assert!(seen[0][1]
            .content
            .contains("Error: - [dangling_reference] dcis: parent 'ghost' does not exist"));
        assert!(seen[0][1].content.contains("dcis"));

        let usage = synthesizer.usage();
        assert_eq!(usage.llm_calls, 1);
        assert_eq!(usage.repair_calls, 1);
        assert_eq!(usage.total_tokens, 120);
    }

    #[tokio::test]
    async fn test_repair_call_keeps_the_evidence() {
        let provider = Arc::new(EchoProvider::new(r#"{"concepts": []}"#, 10, 10));
        let synthesizer = LlmSynthesizer::new(provider.clone(), CompletionConfig::default());

        let template = PromptTemplate::default();
        let context = DatasetContext::new("BRACS");
        let evidence = vec![RawDocument {
            id: "38211".to_string(),
            source: Source::Pubmed,
            title: "Flat epithelial atypia and columnar cell change".to_string(),
            url: "https://pubmed.ncbi.nlm.nih.gov/38211/".to_string(),
            published: None,
            license: None,
            snippet: "monotonous cuboidal cells".to_string(),
            payload: JsonValue::Null,
        }];
        let previous = CandidateDocument::new(r#"{"concepts": []}"#);
        let report = ValidationReport::from_issues(vec![ValidationIssue::new(
            ErrorKind::Cardinality,
            "too few concepts",
        )]);

        let repair = SynthesisRequest {
            template: &template,
            context: &context,
            queries: &[],
            evidence: &evidence,
            feedback: Some(RepairFeedback {
                previous: &previous,
                report: &report,
            }),
        };
        synthesizer.synthesize(&repair).await.unwrap();

        let seen = provider.seen.lock();
        let text: String = seen[0].iter().map(|m| m.content.as_str()).collect();
        assert!(text.contains("Flat epithelial atypia and columnar cell change"));
        assert!(text.contains("https://pubmed.ncbi.nlm.nih.gov/38211/"));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_skips_the_call() {
        let provider = Arc::new(EchoProvider::new("{}", 10, 10));
        let synthesizer = LlmSynthesizer::new(provider.clone(), CompletionConfig::default())
            .with_budget(Arc::new(BudgetTracker::new(5, 5)));

        let template = PromptTemplate::default();
        let context = DatasetContext::new("BRACS");
        let err = synthesizer
            .synthesize(&request(&template, &context, None))
            .await
            .unwrap_err();

        assert!(matches!(err, SynthesisError::BudgetExceeded { kind: CallKind::Synthesis, .. }));
        assert!(provider.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_blank_response_is_an_error() {
        let provider = Arc::new(EchoProvider::new("  \n", 10, 0));
        let synthesizer = LlmSynthesizer::new(provider, CompletionConfig::default());

        let template = PromptTemplate::default();
        let context = DatasetContext::new("BRACS");
        let err = synthesizer
            .synthesize(&request(&template, &context, None))
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::EmptyResponse));
    }
}
