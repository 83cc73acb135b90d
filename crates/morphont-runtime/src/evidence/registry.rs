//! Registry of evidence providers keyed by source.
//!
//! ## Usage
//!
//! ```ignore
//! let mut registry = EvidenceRegistry::new();
//! registry.register(Arc::new(StaticProvider::new(Source::from("scopus"), docs)));
//!
//! let provider = registry.get(&query.source)?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{EvidenceProvider, ProviderError};
use crate::records::Source;

/// The registry maintains a mapping of sources to their providers.
#[derive(Default, Clone)]
pub struct EvidenceRegistry {
    providers: BTreeMap<Source, Arc<dyn EvidenceProvider>>,
}

impl EvidenceRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own source.
    ///
    /// If a provider for the same source already exists, it will be replaced.
    pub fn register(&mut self, provider: Arc<dyn EvidenceProvider>) {
        self.providers.insert(provider.source(), provider);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, provider: Arc<dyn EvidenceProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Look up the provider for a source.
    pub fn get(&self, source: &Source) -> Result<Arc<dyn EvidenceProvider>, ProviderError> {
        self.providers
            .get(source)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownSource(source.clone()))
    }

    /// List registered sources.
    pub fn sources(&self) -> Vec<&Source> {
        self.providers.keys().collect()
    }

    pub fn has_source(&self, source: &Source) -> bool {
        self.providers.contains_key(source)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for EvidenceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidenceRegistry")
            .field("sources", &self.sources())
            .finish()
    }
}
