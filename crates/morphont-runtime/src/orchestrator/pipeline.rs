//! Stage bodies shared by both strategies.
//!
//! The strategies decide the order of stages; everything a stage actually
//! does lives here so both produce identical records and outcomes.

use morphont_core::{CandidateDocument, DocumentMetadata, ValidationReport, Validator};
use std::collections::HashSet;
use std::sync::Arc;

use super::{RunError, RunOutcome, RunRequest, RunSettings, RunTrace, Stage, TransitionTable};
use crate::evidence::{EvidenceGateway, ProviderError, RawDocument};
use crate::prompts::PromptTemplate;
use crate::records::{Query, ResultRecord, SearchRecord};
use crate::store::CacheStore;
use crate::synthesis::{RepairFeedback, SynthesisEngine, SynthesisError, SynthesisRequest, Synthesizer};

/// Queries derived for one run.
pub(crate) struct Plan {
    /// Distinct keywords, shown to the model
    pub keywords: Vec<String>,

    /// One query per keyword and source
    pub queries: Vec<Query>,
}

/// Evidence for one run.
pub(crate) struct Evidence {
    pub anchor: SearchRecord,
    pub documents: Vec<RawDocument>,
}

/// Transient working state of one run.
pub(crate) struct RunState {
    pub iterations: u32,
    latest: Option<(CandidateDocument, ValidationReport)>,
    best: Option<(CandidateDocument, ValidationReport)>,
    last_error: Option<SynthesisError>,
    pub trace: RunTrace,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            iterations: 0,
            latest: None,
            best: None,
            last_error: None,
            trace: RunTrace::new(),
        }
    }

    pub fn advance(&self, from: Stage, to: Stage) {
        tracing::debug!(from = %from, to = %to, iteration = self.iterations, "stage transition");
    }

    /// Keep `candidate` as the latest, and as the best when it has no more
    /// errors than the current best.
    fn accept(&mut self, candidate: CandidateDocument, report: ValidationReport) {
        let better = self
            .best
            .as_ref()
            .map_or(true, |(_, best)| report.error_count() <= best.error_count());
        if better {
            self.best = Some((candidate.clone(), report.clone()));
        }
        self.latest = Some((candidate, report));
    }
}

/// Where a run goes next; validation carries the candidate it checks.
enum Step {
    Synthesize,
    Validate(CandidateDocument),
    Repair,
    Done(Stage),
}

impl Step {
    fn entering(stage: Stage) -> Self {
        match stage {
            Stage::Synthesis => Step::Synthesize,
            Stage::Repair => Step::Repair,
            terminal => Step::Done(terminal),
        }
    }
}

fn transition(table: &TransitionTable, state: &RunState, from: Stage, valid: bool) -> Stage {
    let to = table.next(from, valid, state.iterations);
    state.advance(from, to);
    to
}

pub(crate) struct Pipeline {
    store: Arc<dyn CacheStore>,
    gateway: Arc<EvidenceGateway>,
    engine: SynthesisEngine,
    template: PromptTemplate,
    settings: RunSettings,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn CacheStore>,
        gateway: Arc<EvidenceGateway>,
        synthesizer: Arc<dyn Synthesizer>,
        template: PromptTemplate,
        settings: RunSettings,
    ) -> Self {
        Self {
            engine: SynthesisEngine::new(synthesizer, store.clone()),
            store,
            gateway,
            template,
            settings,
        }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Run every stage in the order `table` dictates, from query
    /// formulation to a terminal stage.
    pub async fn drive(&self, table: &TransitionTable, request: &RunRequest) -> Result<RunOutcome, RunError> {
        let mut state = RunState::new();

        request.cancel.check()?;
        let plan = self.plan(request, &mut state)?;
        let gathering = transition(table, &state, Stage::QueryFormulation, false);

        request.cancel.check()?;
        let evidence = self.gather(&plan, &mut state).await?;
        let mut step = Step::entering(transition(table, &state, gathering, false));

        loop {
            request.cancel.check()?;
            step = match step {
                Step::Synthesize => match self.synthesize(request, &plan, &evidence, &mut state).await? {
                    Some(candidate) => {
                        transition(table, &state, Stage::Synthesis, false);
                        Step::Validate(candidate)
                    }
                    None => {
                        let to = table.after_failure(state.iterations);
                        state.advance(Stage::Synthesis, to);
                        Step::entering(to)
                    }
                },
                Step::Validate(candidate) => {
                    let valid = self.validate(request, candidate, &mut state);
                    Step::entering(transition(table, &state, Stage::Validation, valid))
                }
                Step::Repair => {
                    self.repair(&mut state);
                    Step::entering(transition(table, &state, Stage::Repair, false))
                }
                Step::Done(terminal) => return self.finish(request, &evidence, state, terminal),
            };
        }
    }

    /// Query formulation.
    pub fn plan(&self, request: &RunRequest, state: &mut RunState) -> Result<Plan, RunError> {
        if request.context.dataset.trim().is_empty() {
            return Err(RunError::InvalidRequest("dataset name is empty".to_string()));
        }

        let sources = request
            .sources
            .clone()
            .unwrap_or_else(|| self.settings.sources.clone());
        if sources.is_empty() {
            return Err(RunError::InvalidRequest("no evidence sources selected".to_string()));
        }
        if let Some(missing) = sources.iter().find(|s| !self.gateway.registry().has_source(s)) {
            return Err(ProviderError::UnknownSource(missing.clone()).into());
        }

        let keywords = request.search_keywords();
        if keywords.is_empty() {
            return Err(RunError::InvalidRequest("no search keywords".to_string()));
        }

        let queries: Vec<Query> = keywords
            .iter()
            .flat_map(|keyword| {
                sources.iter().map(move |source| {
                    Query::new(keyword.clone(), source.clone()).with_max_results(self.settings.max_results)
                })
            })
            .collect();

        tracing::info!(
            dataset = %request.context.dataset,
            keywords = keywords.len(),
            sources = sources.len(),
            "queries formulated"
        );
        state.trace.record(
            Stage::QueryFormulation,
            0,
            format!("{} keyword(s) across {} source(s)", keywords.len(), sources.len()),
        );

        Ok(Plan { keywords, queries })
    }

    /// Evidence gathering. Documents are de-duplicated by source and id and
    /// capped at `max_documents`; zero documents is fine.
    pub async fn gather(&self, plan: &Plan, state: &mut RunState) -> Result<Evidence, RunError> {
        let mut anchor: Option<SearchRecord> = None;
        let mut documents = Vec::new();
        let mut seen = HashSet::new();
        let mut reused = 0;

        for query in &plan.queries {
            let (record, found, from_cache) = self.gather_one(query).await?;
            if from_cache {
                reused += 1;
            }
            anchor.get_or_insert(record);
            for doc in found {
                if seen.insert((doc.source.clone(), doc.id.clone())) {
                    documents.push(doc);
                }
            }
        }
        documents.truncate(self.settings.max_documents);

        let anchor = anchor.ok_or_else(|| RunError::InvalidRequest("no queries to run".to_string()))?;

        state.trace.record(
            Stage::EvidenceGathering,
            0,
            format!(
                "{} document(s) from {} query(ies), {} served from cache",
                documents.len(),
                plan.queries.len(),
                reused
            ),
        );

        Ok(Evidence { anchor, documents })
    }

    /// One query: from the store when reuse allows it, otherwise recorded
    /// first and then sent to the provider.
    async fn gather_one(&self, query: &Query) -> Result<(SearchRecord, Vec<RawDocument>, bool), RunError> {
        if self.settings.reuse_searches {
            if let Some(record) = self.store.find_search(query)? {
                let results = self.store.results_for(record.id)?;
                if !results.is_empty() {
                    tracing::debug!(
                        keyword = %query.keyword,
                        source = %query.source,
                        search_id = record.id,
                        results = results.len(),
                        "search served from cache store"
                    );
                    let documents = results
                        .iter()
                        .map(|r| RawDocument::from_result_record(&query.source, r))
                        .collect();
                    return Ok((record, documents, true));
                }
            }
        }

        let record = self.store.record_search(query)?;
        let documents = self.gateway.gather(query).await?;
        let results: Vec<ResultRecord> = documents.iter().map(RawDocument::to_result_record).collect();
        let inserted = self.store.record_results(record.id, &results)?;

        tracing::info!(
            keyword = %query.keyword,
            source = %query.source,
            search_id = record.id,
            documents = documents.len(),
            inserted,
            "evidence recorded"
        );
        Ok((record, documents, false))
    }

    /// Synthesis. Repairs the latest candidate when there is one. `None`
    /// means the attempt failed; it still counts as an iteration.
    pub async fn synthesize(
        &self,
        request: &RunRequest,
        plan: &Plan,
        evidence: &Evidence,
        state: &mut RunState,
    ) -> Result<Option<CandidateDocument>, RunError> {
        state.iterations += 1;
        let iteration = state.iterations;

        let attempt = {
            let feedback = state
                .latest
                .as_ref()
                .map(|(previous, report)| RepairFeedback { previous, report });
            let synthesis = SynthesisRequest {
                template: &self.template,
                context: &request.context,
                queries: &plan.keywords,
                evidence: &evidence.documents,
                feedback,
            };
            self.engine.run(&evidence.anchor, &synthesis).await?
        };

        let detail = format!("{} (extraction {})", attempt.extraction.extractor, attempt.extraction.id);
        match attempt.outcome {
            Ok(candidate) => {
                state.trace.record(Stage::Synthesis, iteration, detail);
                Ok(Some(candidate))
            }
            Err(e) => {
                state.trace.record(Stage::Synthesis, iteration, format!("{}: {}", detail, e));
                state.last_error = Some(e);
                Ok(None)
            }
        }
    }

    /// Validation. Returns whether the candidate is valid.
    pub fn validate(&self, request: &RunRequest, candidate: CandidateDocument, state: &mut RunState) -> bool {
        let rules = self
            .settings
            .rules
            .clone()
            .with_classes(request.context.classes.iter().cloned());
        let validator = Validator::new(rules);

        let report = match &state.latest {
            Some((previous, _)) => validator.validate_repair(&candidate, previous),
            None => validator.validate(&candidate),
        };

        if report.valid {
            tracing::info!(
                dataset = %request.context.dataset,
                iteration = state.iterations,
                "candidate is valid"
            );
        } else {
            tracing::info!(
                dataset = %request.context.dataset,
                iteration = state.iterations,
                errors = report.error_count(),
                "candidate is invalid"
            );
        }

        state.trace.record_validation(state.iterations, &report);
        let valid = report.valid;
        state.accept(candidate, report);
        valid
    }

    /// Repair: the next synthesis sees the latest candidate and its report.
    pub fn repair(&self, state: &mut RunState) {
        let detail = match &state.latest {
            Some((_, report)) => format!("repairing {} error(s)", report.error_count()),
            None => "retrying synthesis".to_string(),
        };
        state.trace.record(Stage::Repair, state.iterations, detail);
    }

    /// Close the run at `terminal`.
    pub fn finish(
        &self,
        request: &RunRequest,
        evidence: &Evidence,
        state: RunState,
        terminal: Stage,
    ) -> Result<RunOutcome, RunError> {
        let RunState {
            iterations,
            latest,
            best,
            last_error,
            mut trace,
        } = state;

        let chosen = if terminal == Stage::Finalize { latest } else { best };
        let Some((candidate, report)) = chosen else {
            tracing::warn!(
                dataset = %request.context.dataset,
                attempts = iterations,
                "every synthesis attempt failed"
            );
            return Err(RunError::Synthesis(last_error.unwrap_or(SynthesisError::EmptyResponse)));
        };

        let document = (terminal == Stage::Finalize).then(|| {
            candidate.parse().into_document(DocumentMetadata {
                version: self.settings.version.clone(),
                dataset: request.context.dataset.clone(),
                notes: String::new(),
            })
        });

        let detail = match &document {
            Some(doc) => format!("{} concept(s)", doc.concepts.len()),
            None => format!("best candidate has {} error(s)", report.error_count()),
        };
        trace.record(terminal, iterations, detail);

        tracing::info!(
            dataset = %request.context.dataset,
            terminal = %terminal,
            attempts = iterations,
            errors = report.error_count(),
            "run finished"
        );

        Ok(RunOutcome {
            terminal,
            document,
            candidate,
            report,
            attempts: iterations,
            evidence: evidence.documents.len(),
            trace,
            anchor_search_id: evidence.anchor.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morphont_core::{ErrorKind, ValidationIssue};

    fn report(errors: usize) -> ValidationReport {
        ValidationReport::from_issues(
            (0..errors)
                .map(|i| ValidationIssue::new(ErrorKind::Schema, format!("error {}", i)))
                .collect(),
        )
    }

    #[test]
    fn test_best_prefers_fewest_errors_then_latest() {
        let mut state = RunState::new();
        state.accept(CandidateDocument::new("first"), report(3));
        state.accept(CandidateDocument::new("second"), report(1));
        state.accept(CandidateDocument::new("third"), report(2));
        assert_eq!(state.best.as_ref().unwrap().0.raw(), "second");
        assert_eq!(state.latest.as_ref().unwrap().0.raw(), "third");

        state.accept(CandidateDocument::new("fourth"), report(1));
        assert_eq!(state.best.as_ref().unwrap().0.raw(), "fourth");
    }
}
