//! Provider factories for dynamic LLM provider registration.
//!
//! ```ignore
//! let registry = ProviderRegistry::with_defaults().with_lookup(Arc::new(|k| std::env::var(k).ok()));
//! let provider = registry.create(&config.llm.provider, &config.llm.provider_config())?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::secrets::{no_env, EnvLookup};
use super::{LlmError, LlmProvider};

/// Creates LLM providers of one type from JSON configuration.
pub trait ProviderFactory: Send + Sync {
    /// Unique identifier for this provider type, e.g. "anthropic".
    fn provider_type(&self) -> &'static str;

    /// Create a provider. Settings missing from `config` may be resolved
    /// through `lookup`.
    fn create(&self, config: &JsonValue, lookup: &EnvLookup) -> Result<Arc<dyn LlmProvider>, LlmError>;

    /// Validate configuration without creating a provider.
    fn validate_config(&self, config: &JsonValue, lookup: &EnvLookup) -> Result<(), LlmError>;

    fn default_config(&self) -> JsonValue {
        serde_json::json!({})
    }

    fn description(&self) -> &'static str {
        "LLM Provider"
    }
}

/// Provider factories keyed by type name.
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
    lookup: Arc<EnvLookup>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self {
            factories: BTreeMap::new(),
            lookup: Arc::new(no_env),
        }
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve credentials missing from provider config through `lookup`.
    pub fn with_lookup(mut self, lookup: Arc<EnvLookup>) -> Self {
        self.lookup = lookup;
        self
    }

    /// Register a factory, replacing any factory of the same type.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_type().to_string(), factory);
    }

    pub fn create(
        &self,
        provider_type: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn LlmProvider>, LlmError> {
        self.factories
            .get(provider_type)
            .ok_or_else(|| {
                LlmError::NotConfigured(format!(
                    "Unknown provider type: '{}'. Available: {:?}",
                    provider_type,
                    self.available_types()
                ))
            })?
            .create(config, self.lookup.as_ref())
    }

    pub fn validate(&self, provider_type: &str, config: &JsonValue) -> Result<(), LlmError> {
        self.factories
            .get(provider_type)
            .ok_or_else(|| {
                LlmError::NotConfigured(format!("Unknown provider type: '{}'", provider_type))
            })?
            .validate_config(config, self.lookup.as_ref())
    }

    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    pub fn has_provider(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }

    pub fn default_config(&self, provider_type: &str) -> Option<JsonValue> {
        self.factories
            .get(provider_type)
            .map(|f| f.default_config())
    }

    /// Registry with every provider compiled into this build.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "anthropic")]
        registry.register(Arc::new(super::AnthropicProviderFactory));
        #[cfg(feature = "openai")]
        registry.register(Arc::new(super::OpenAiProviderFactory));
        registry
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available_types())
            .finish()
    }
}
