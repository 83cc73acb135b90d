//! Runtime configuration.
//!
//! Loaded from YAML. Every section has defaults, so an empty file is a valid
//! configuration. Components receive the section they need. The CLI applies
//! environment overrides through [`RuntimeConfig::apply_overrides`] with a
//! lookup function it controls.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::llm::ConfigSecret;
use crate::records::Source;
use crate::resilience::RetryPolicy;

/// Errors from loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Durations as humantime strings (`"500ms"`, `"20s"`); plain integers are
/// read as seconds.
pub mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => humantime::parse_duration(&text).map_err(serde::de::Error::custom),
        }
    }
}

/// Which orchestrator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    SinglePass,
    #[default]
    RepairLoop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// SQLite database file
    pub path: PathBuf,

    /// Serve identical queries from earlier searches that returned results
    pub reuse_searches: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("morphont.db"),
            reuse_searches: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentCacheConfig {
    pub max_entries: u64,

    #[serde(with = "duration_str")]
    pub ttl: Duration,
}

impl Default for DocumentCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// An offline source served from a fixture file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureSource {
    pub source: Source,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PubMedSection {
    /// NCBI API key; raises the allowed request rate
    #[serde(skip_serializing)]
    pub api_key: Option<ConfigSecret>,

    /// Contact address sent with every request
    pub email: Option<String>,

    #[serde(with = "duration_str")]
    pub min_interval: Duration,

    #[serde(with = "duration_str")]
    pub timeout: Duration,
}

impl Default for PubMedSection {
    fn default() -> Self {
        Self {
            api_key: None,
            email: None,
            min_interval: Duration::from_millis(340),
            timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EuropePmcSection {
    #[serde(with = "duration_str")]
    pub min_interval: Duration,

    #[serde(with = "duration_str")]
    pub timeout: Duration,
}

impl Default for EuropePmcSection {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticScholarSection {
    /// Sent as `x-api-key`; unauthenticated clients share a small rate pool
    #[serde(skip_serializing)]
    pub api_key: Option<ConfigSecret>,

    #[serde(with = "duration_str")]
    pub min_interval: Duration,

    #[serde(with = "duration_str")]
    pub timeout: Duration,
}

impl Default for SemanticScholarSection {
    fn default() -> Self {
        Self {
            api_key: None,
            min_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossrefSection {
    /// Contact address; requests carrying one use Crossref's polite pool
    pub mailto: Option<String>,

    #[serde(with = "duration_str")]
    pub min_interval: Duration,

    #[serde(with = "duration_str")]
    pub timeout: Duration,
}

impl Default for CrossrefSection {
    fn default() -> Self {
        Self {
            mailto: None,
            min_interval: Duration::from_millis(200),
            timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    /// Sources queried for every keyword
    pub sources: Vec<Source>,

    /// Hits requested per query
    pub max_results: u32,

    /// Documents handed to the model per attempt
    pub max_documents: usize,

    pub retry: RetryPolicy,

    pub document_cache: DocumentCacheConfig,

    pub fixtures: Vec<FixtureSource>,

    pub pubmed: PubMedSection,

    pub europe_pmc: EuropePmcSection,

    pub semantic_scholar: SemanticScholarSection,

    pub crossref: CrossrefSection,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            sources: vec![Source::Pubmed],
            max_results: 20,
            max_documents: 20,
            retry: RetryPolicy::default(),
            document_cache: DocumentCacheConfig::default(),
            fixtures: Vec::new(),
            pubmed: PubMedSection::default(),
            europe_pmc: EuropePmcSection::default(),
            semantic_scholar: SemanticScholarSection::default(),
            crossref: CrossrefSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// Provider type registered with the LLM provider registry
    pub provider: String,

    pub model: String,

    pub max_tokens: u32,

    pub temperature: f32,

    #[serde(with = "duration_str")]
    pub timeout: Duration,

    pub base_url: Option<String>,

    #[serde(skip_serializing)]
    pub api_key: Option<ConfigSecret>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 4096,
            temperature: 0.2,
            timeout: Duration::from_secs(120),
            base_url: None,
            api_key: None,
        }
    }
}

impl LlmSection {
    /// Provider configuration in the shape provider factories expect.
    pub fn provider_config(&self) -> serde_json::Value {
        let mut config = serde_json::json!({ "model": self.model });
        if let Some(url) = &self.base_url {
            config["base_url"] = serde_json::Value::String(url.clone());
        }
        if let Some(key) = &self.api_key {
            config["api_key"] = serde_json::Value::String(key.expose().to_string());
        }
        config
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub global_max_tokens: u32,
    pub repair_max_tokens: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            global_max_tokens: 200_000,
            repair_max_tokens: 120_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub strategy: Strategy,

    /// Synthesis attempts allowed per run (repair loop only)
    pub max_iters: u32,

    pub min_concepts_per_class: usize,
    pub min_positives: usize,
    pub min_negatives: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::RepairLoop,
            max_iters: 3,
            min_concepts_per_class: 1,
            min_positives: 0,
            min_negatives: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PromptConfig {
    /// Template with `{{DATASET_NAME}}`, `{{NUM_CLASSES}}` and
    /// `{{CLASS_DESCRIPTIONS}}` placeholders; built-in template when unset
    pub template_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,

    /// Also keep a timestamped copy of every finalized ontology here
    pub versions_dir: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("outputs"),
            versions_dir: None,
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    pub cache: CacheConfig,
    pub evidence: EvidenceConfig,
    pub llm: LlmSection,
    pub budget: BudgetConfig,
    pub orchestrator: OrchestratorConfig,
    pub prompt: PromptConfig,
    pub output: OutputConfig,
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.max_iters == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.max_iters must be at least 1".to_string(),
            ));
        }
        if self.evidence.max_results == 0 {
            return Err(ConfigError::Invalid(
                "evidence.max_results must be at least 1".to_string(),
            ));
        }
        if self.evidence.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "evidence.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if let Some(url) = &self.llm.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Invalid(
                    "llm.base_url must start with http:// or https://".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Apply `MORPHONT_*`, NCBI and Semantic Scholar overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("MORPHONT_DB") {
            self.cache.path = PathBuf::from(path);
        }
        if let Some(provider) = lookup("MORPHONT_PROVIDER") {
            self.llm.provider = provider;
        }
        if let Some(model) = lookup("MORPHONT_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = lookup("MORPHONT_BASE_URL") {
            self.llm.base_url = Some(url);
        }
        if let Some(iters) = lookup("MORPHONT_MAX_ITERS") {
            self.orchestrator.max_iters = iters.parse().map_err(|_| {
                ConfigError::Invalid(format!("MORPHONT_MAX_ITERS is not a number: {}", iters))
            })?;
        }
        if let Some(key) = lookup("NCBI_API_KEY") {
            self.evidence.pubmed.api_key = Some(ConfigSecret::from(key));
        }
        if let Some(email) = lookup("NCBI_EMAIL") {
            self.evidence.pubmed.email = Some(email);
        }
        if let Some(key) = lookup("SEMANTIC_SCHOLAR_API_KEY") {
            self.evidence.semantic_scholar.api_key = Some(ConfigSecret::from(key));
        }
        self.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = RuntimeConfig::from_yaml("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.orchestrator.strategy, Strategy::RepairLoop);
        assert_eq!(config.evidence.sources, vec![Source::Pubmed]);
    }

    #[test]
    fn test_partial_config() {
        let yaml = r#"
cache:
  path: /tmp/cache.db
evidence:
  sources: [pubmed, europe_pmc, scopus]
  retry:
    max_attempts: 4
    min_delay: 250ms
  document_cache:
    ttl: 10m
  fixtures:
    - source: scopus
      path: fixtures/scopus.json
orchestrator:
  strategy: single_pass
  max_iters: 2
llm:
  provider: anthropic
  timeout: 90
"#;
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.cache.path, PathBuf::from("/tmp/cache.db"));
        assert!(config.cache.reuse_searches);
        assert_eq!(
            config.evidence.sources,
            vec![Source::Pubmed, Source::EuropePmc, Source::Other("scopus".into())]
        );
        assert_eq!(config.evidence.retry.max_attempts, 4);
        assert_eq!(config.evidence.retry.min_delay, Duration::from_millis(250));
        assert_eq!(config.evidence.document_cache.ttl, Duration::from_secs(600));
        assert_eq!(config.evidence.fixtures[0].source, Source::Other("scopus".into()));
        assert_eq!(config.orchestrator.strategy, Strategy::SinglePass);
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.llm.timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let err = RuntimeConfig::from_yaml("orchestrator:\n  max_iters: 0\n").unwrap_err();
        assert!(err.to_string().contains("max_iters"));
    }

    #[test]
    fn test_bad_duration_rejected() {
        assert!(RuntimeConfig::from_yaml("llm:\n  timeout: soon\n").is_err());
    }

    #[test]
    fn test_overrides_come_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("MORPHONT_DB", "/data/run.db"),
            ("MORPHONT_MAX_ITERS", "5"),
            ("NCBI_API_KEY", "ncbi-secret"),
            ("SEMANTIC_SCHOLAR_API_KEY", "s2-secret"),
        ]
        .into_iter()
        .collect();

        let mut config = RuntimeConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.cache.path, PathBuf::from("/data/run.db"));
        assert_eq!(config.orchestrator.max_iters, 5);
        assert_eq!(
            config.evidence.pubmed.api_key.as_ref().map(ConfigSecret::expose),
            Some("ncbi-secret")
        );
        assert_eq!(
            config.evidence.semantic_scholar.api_key.as_ref().map(ConfigSecret::expose),
            Some("s2-secret")
        );
    }

    #[test]
    fn test_secrets_redacted_in_debug() {
        let mut config = RuntimeConfig::default();
        config.llm.api_key = Some("sk-very-secret".into());
        config.evidence.pubmed.api_key = Some("ncbi-very-secret".into());
        config.evidence.semantic_scholar.api_key = Some("s2-very-secret".into());

        let debug = format!("{:?}", config);
        assert!(!debug.contains("sk-very-secret"));
        assert!(!debug.contains("ncbi-very-secret"));
        assert!(!debug.contains("s2-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_secrets_read_from_yaml() {
        let yaml = r#"
llm:
  provider: anthropic
  api_key: sk-from-file
evidence:
  semantic_scholar:
    api_key: s2-from-file
  crossref:
    mailto: curator@example.org
"#;
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.llm.api_key.as_ref().map(ConfigSecret::expose), Some("sk-from-file"));
        assert_eq!(config.llm.provider_config()["api_key"], "sk-from-file");
        assert_eq!(
            config.evidence.semantic_scholar.api_key.as_ref().map(ConfigSecret::expose),
            Some("s2-from-file")
        );
        assert_eq!(config.evidence.crossref.mailto.as_deref(), Some("curator@example.org"));

        let written = serde_yaml::to_string(&config).unwrap();
        assert!(!written.contains("sk-from-file"));
        assert!(!written.contains("s2-from-file"));
    }

    #[test]
    fn test_durations_serialize_as_text() {
        let yaml = serde_yaml::to_string(&RuntimeConfig::default()).unwrap();
        assert!(yaml.contains("timeout: 2m"));
        assert!(!yaml.contains("api_key"));
    }
}
