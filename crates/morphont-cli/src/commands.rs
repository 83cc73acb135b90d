//! Subcommand implementations.

use anyhow::{bail, Context, Result};
use morphont_core::{CandidateDocument, ValidationRules, Validator};
use morphont_runtime::evidence::{
    CrossrefConfig, CrossrefProvider, EuropePmcConfig, EuropePmcProvider, PubMedConfig, PubMedProvider,
    SemanticScholarConfig, SemanticScholarProvider,
};
use morphont_runtime::llm::CompletionConfig;
use morphont_runtime::{
    write_artifact, BudgetTracker, CacheStore, CancellationFlag, DatasetContext, DocumentCache,
    EvidenceGateway, EvidenceRegistry, LlmSynthesizer, OrchestratorBuilder, PromptTemplate,
    ProviderRegistry, RunRequest, RuntimeConfig, Source, SqliteCacheStore, StaticProvider,
};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use crate::args::{BuildArgs, InspectArgs, ValidateArgs};

/// Exit code for a run that ended without a valid ontology.
const EXIT_INVALID: u8 = 2;

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Configuration from file (or defaults) with environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    let mut config = match path {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    config
        .apply_overrides(env_lookup)
        .context("applying environment overrides")?;
    Ok(config)
}

fn evidence_registry(config: &RuntimeConfig) -> Result<EvidenceRegistry> {
    let mut registry = EvidenceRegistry::new();
    registry.register(Arc::new(
        PubMedProvider::new(PubMedConfig::from(&config.evidence.pubmed)).context("PubMed provider")?,
    ));
    registry.register(Arc::new(
        EuropePmcProvider::new(EuropePmcConfig::from(&config.evidence.europe_pmc))
            .context("Europe PMC provider")?,
    ));
    registry.register(Arc::new(
        SemanticScholarProvider::new(SemanticScholarConfig::from(&config.evidence.semantic_scholar))
            .context("Semantic Scholar provider")?,
    ));
    registry.register(Arc::new(
        CrossrefProvider::new(CrossrefConfig::from(&config.evidence.crossref)).context("Crossref provider")?,
    ));
    for fixture in &config.evidence.fixtures {
        let provider = StaticProvider::from_json_file(fixture.source.clone(), &fixture.path)
            .with_context(|| format!("loading fixtures for {}", fixture.source))?;
        tracing::info!(source = %fixture.source, documents = provider.len(), "fixture source loaded");
        registry.register(Arc::new(provider));
    }
    Ok(registry)
}

fn interrupt_cancels(flag: CancellationFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            flag.cancel();
        }
    });
}

pub async fn build(mut config: RuntimeConfig, args: BuildArgs) -> Result<ExitCode> {
    if let Some(strategy) = args.strategy {
        config.orchestrator.strategy = strategy.into();
    }
    if let Some(max_iters) = args.max_iters {
        config.orchestrator.max_iters = max_iters;
    }
    if let Some(template) = args.template {
        config.prompt.template_path = Some(template);
    }
    if let Some(output) = args.output {
        config.output.dir = output;
    }
    config.validate()?;

    let store: Arc<dyn CacheStore> = Arc::new(
        SqliteCacheStore::open(&config.cache.path)
            .with_context(|| format!("opening cache store {}", config.cache.path.display()))?,
    );

    let gateway = EvidenceGateway::new(
        evidence_registry(&config)?,
        config.evidence.retry.clone(),
        DocumentCache::new(
            config.evidence.document_cache.max_entries,
            config.evidence.document_cache.ttl,
        ),
    );

    let providers = ProviderRegistry::with_defaults().with_lookup(Arc::new(env_lookup));
    let provider_config = config.llm.provider_config();
    providers
        .validate(&config.llm.provider, &provider_config)
        .with_context(|| format!("LLM provider '{}'", config.llm.provider))?;
    let provider = providers.create(&config.llm.provider, &provider_config)?;

    let synthesizer = Arc::new(
        LlmSynthesizer::new(provider, CompletionConfig::from(&config.llm))
            .with_budget(Arc::new(BudgetTracker::new(
                config.budget.global_max_tokens,
                config.budget.repair_max_tokens,
            )))
            .with_max_documents(config.evidence.max_documents),
    );

    let template = match &config.prompt.template_path {
        Some(path) => PromptTemplate::from_file(path)?,
        None => PromptTemplate::default(),
    };

    let orchestrator = OrchestratorBuilder::from_config(&config)
        .store(store)
        .gateway(gateway)
        .synthesizer(synthesizer.clone())
        .template(template)
        .build()?;

    let mut context = DatasetContext::new(&args.dataset).with_classes(args.classes);
    if let Some(path) = &args.descriptions {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading class descriptions from {}", path.display()))?;
        context = context.with_descriptions(text);
    }

    let cancel = CancellationFlag::new();
    interrupt_cancels(cancel.clone());

    let mut request = RunRequest::new(context)
        .with_keywords(args.keywords)
        .with_cancellation(cancel);
    if !args.sources.is_empty() {
        request = request.with_sources(args.sources.into_iter().map(Source::from).collect());
    }

    let outcome = orchestrator.run(&request).await?;

    let usage = synthesizer.usage();
    tracing::info!(
        llm_calls = usage.llm_calls,
        repair_calls = usage.repair_calls,
        total_tokens = usage.total_tokens,
        "token usage"
    );

    match &outcome.document {
        Some(document) => {
            let written = write_artifact(&config.output.dir, config.output.versions_dir.as_deref(), document)?;
            println!("{}", written.path.display());
            if let Some(snapshot) = written.snapshot {
                println!("{}", snapshot.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!(
                "No valid ontology after {} attempt(s); best candidate has {} error(s):",
                outcome.attempts,
                outcome.report.error_count()
            );
            eprintln!("{}", outcome.report.summary());
            Ok(ExitCode::from(EXIT_INVALID))
        }
    }
}

pub fn validate(config: &RuntimeConfig, args: ValidateArgs) -> Result<ExitCode> {
    let raw = std::fs::read_to_string(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;

    let rules = ValidationRules {
        classes: args.classes,
        min_concepts_per_class: args
            .min_concepts
            .unwrap_or(config.orchestrator.min_concepts_per_class),
        min_positives: config.orchestrator.min_positives,
        min_negatives: config.orchestrator.min_negatives,
    };
    let report = Validator::new(rules).validate(&CandidateDocument::new(raw));

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.valid {
        println!("{}: valid", args.file.display());
    } else {
        println!("{}: {} error(s)", args.file.display(), report.error_count());
        println!("{}", report.summary());
    }

    Ok(if report.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub fn inspect(config: &RuntimeConfig, args: InspectArgs) -> Result<ExitCode> {
    let store = SqliteCacheStore::open_read_only(&config.cache.path)
        .with_context(|| format!("opening cache store {}", config.cache.path.display()))?;

    let view = match (args.search, args.keyword) {
        (Some(id), _) => {
            let Some(search) = store.search(id)? else {
                bail!("no search record with id {}", id);
            };
            serde_json::json!({
                "search": search,
                "results": store.results_for(id)?,
                "extractions": store.extractions_for(id)?,
            })
        }
        (None, Some(keyword)) => {
            let source = args.source.map(Source::from);
            let mut rows = Vec::new();
            for search in store.searches_for(&keyword, source.as_ref())? {
                rows.push(serde_json::json!({
                    "id": search.id,
                    "source": search.query.source,
                    "requested_at": search.requested_at,
                    "results": store.results_for(search.id)?.len(),
                    "extractions": store.extractions_for(search.id)?.len(),
                }));
            }
            serde_json::Value::Array(rows)
        }
        (None, None) => bail!("pass --keyword or --search"),
    };

    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(ExitCode::SUCCESS)
}

pub fn show_config(config: &RuntimeConfig) -> Result<ExitCode> {
    print!("{}", serde_yaml::to_string(config)?);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("morphont.yaml");
        std::fs::write(&path, "orchestrator:\n  strategy: single_pass\n  max_iters: 2\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.orchestrator.max_iters, 2);
    }

    #[test]
    fn test_validate_reports_invalid_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ontology.json");
        std::fs::write(
            &path,
            r#"{"concepts": [{"id": "a", "name": "A", "definition": "x", "parents": ["a"]}]}"#,
        )
        .unwrap();

        let args = ValidateArgs {
            file: path,
            classes: Vec::new(),
            min_concepts: None,
            json: true,
        };
        let code = validate(&RuntimeConfig::default(), args).unwrap();
        assert_eq!(code, ExitCode::FAILURE);
    }

    #[test]
    fn test_inspect_lists_searches() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RuntimeConfig::default();
        config.cache.path = dir.path().join("cache.db");

        let store = SqliteCacheStore::open(&config.cache.path).unwrap();
        store
            .record_search(&morphont_runtime::Query::new("BRACS DCIS", Source::Pubmed))
            .unwrap();
        drop(store);

        let args = InspectArgs {
            keyword: Some("BRACS DCIS".to_string()),
            source: None,
            search: None,
        };
        assert_eq!(inspect(&config, args).unwrap(), ExitCode::SUCCESS);

        let missing = InspectArgs {
            keyword: None,
            source: None,
            search: Some(99),
        };
        assert!(inspect(&config, missing).is_err());
    }

    #[test]
    fn test_inspect_never_creates_a_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RuntimeConfig::default();
        config.cache.path = dir.path().join("missing.db");

        let args = InspectArgs {
            keyword: Some("BRACS DCIS".to_string()),
            source: None,
            search: None,
        };
        assert!(inspect(&config, args).is_err());
        assert!(!config.cache.path.exists());
    }
}
