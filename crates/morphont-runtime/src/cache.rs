//! In-process document cache.
//!
//! Fetched documents are memoized per `(source, id)` so repeated fetches in
//! one process do not go back to the network.

use moka::future::Cache;
use std::time::Duration;

use crate::evidence::RawDocument;
use crate::records::Source;

/// Cache key for fetched documents.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    source: Source,
    id: String,
}

impl DocumentKey {
    pub fn new(source: &Source, id: impl Into<String>) -> Self {
        Self {
            source: source.clone(),
            id: id.into(),
        }
    }
}

/// Document cache using moka.
#[derive(Clone)]
pub struct DocumentCache {
    cache: Cache<DocumentKey, RawDocument>,
}

impl DocumentCache {
    /// Create a new cache with the given configuration.
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub async fn get(&self, key: &DocumentKey) -> Option<RawDocument> {
        self.cache.get(key).await
    }

    pub async fn insert(&self, document: RawDocument) {
        let key = DocumentKey::new(&document.source, document.id.clone());
        self.cache.insert(key, document).await;
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of cached documents.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for DocumentCache {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str) -> RawDocument {
        RawDocument {
            id: id.to_string(),
            source: Source::Pubmed,
            title: format!("title {}", id),
            url: format!("https://pubmed.ncbi.nlm.nih.gov/{}/", id),
            published: None,
            license: None,
            snippet: String::new(),
            payload: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_cache_operations() {
        let cache = DocumentCache::default();
        let key = DocumentKey::new(&Source::Pubmed, "123");

        assert!(cache.get(&key).await.is_none());

        cache.insert(doc("123")).await;
        let cached = cache.get(&key).await;
        assert_eq!(cached.unwrap().title, "title 123");

        // Same id under another source is a different document.
        assert!(cache
            .get(&DocumentKey::new(&Source::EuropePmc, "123"))
            .await
            .is_none());
    }
}
