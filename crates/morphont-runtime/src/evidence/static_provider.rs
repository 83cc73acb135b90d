//! Offline provider backed by a fixed document set.
//!
//! Serves subscription databases without a public API from exported
//! fixtures, and lets whole runs execute without network access.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::path::Path;

use super::{EvidenceProvider, ProviderFault, RawDocument, RawHit};
use crate::records::{Query, Source};

/// Shortest keyword token considered when matching.
const MIN_TOKEN_LEN: usize = 3;

pub struct StaticProvider {
    source: Source,
    documents: Vec<RawDocument>,
}

#[derive(Deserialize)]
struct FixtureDocument {
    id: String,
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    published: Option<String>,
    #[serde(default)]
    license: Option<String>,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    payload: JsonValue,
}

impl StaticProvider {
    pub fn new(source: Source, documents: Vec<RawDocument>) -> Self {
        Self { source, documents }
    }

    /// Load documents from a JSON array file.
    pub fn from_json_file(source: Source, path: impl AsRef<Path>) -> Result<Self, ProviderFault> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ProviderFault::Malformed(format!("{}: {}", path.display(), e)))?;
        Self::from_json(source, &raw)
    }

    pub fn from_json(source: Source, raw: &str) -> Result<Self, ProviderFault> {
        let fixtures: Vec<FixtureDocument> = serde_json::from_str(raw)
            .map_err(|e| ProviderFault::Malformed(format!("fixture documents: {}", e)))?;

        let documents = fixtures
            .into_iter()
            .map(|f| RawDocument {
                url: if f.url.is_empty() { format!("{}:{}", source, f.id) } else { f.url },
                id: f.id,
                source: source.clone(),
                title: f.title,
                published: f.published,
                license: f.license,
                snippet: f.snippet,
                payload: f.payload,
            })
            .collect();

        Ok(Self::new(source, documents))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl EvidenceProvider for StaticProvider {
    fn source(&self) -> Source {
        self.source.clone()
    }

    async fn search(&self, query: &Query) -> Result<Vec<RawHit>, ProviderFault> {
        let tokens: Vec<String> = query
            .keyword
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= MIN_TOKEN_LEN)
            .map(str::to_string)
            .collect();

        let mut scored: Vec<(usize, &RawDocument)> = self
            .documents
            .iter()
            .filter_map(|doc| {
                let text = format!("{} {}", doc.title, doc.snippet).to_lowercase();
                let score = tokens.iter().filter(|t| text.contains(t.as_str())).count();
                (score > 0).then_some((score, doc))
            })
            .collect();

        // Stable: equal scores keep fixture order.
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(query.max_results as usize)
            .map(|(_, doc)| RawHit {
                id: doc.id.clone(),
                title: doc.title.clone(),
            })
            .collect())
    }

    async fn fetch(&self, ids: &[String]) -> Result<Vec<RawDocument>, ProviderFault> {
        Ok(ids
            .iter()
            .filter_map(|id| self.documents.iter().find(|d| &d.id == id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURES: &str = r#"[
        {"id": "1", "title": "Ductal carcinoma in situ patterns", "snippet": "Cribriform and solid DCIS"},
        {"id": "2", "title": "Stromal reaction", "snippet": "Desmoplastic stroma around invasive carcinoma"},
        {"id": "3", "title": "Unrelated", "snippet": "Renal histology"}
    ]"#;

    #[tokio::test]
    async fn test_search_ranks_by_matching_tokens() {
        let provider = StaticProvider::from_json(Source::from("scopus"), FIXTURES).unwrap();
        let hits = provider
            .search(&Query::new("BRACS invasive carcinoma", Source::from("scopus")))
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);
    }

    #[tokio::test]
    async fn test_search_respects_max_results() {
        let provider = StaticProvider::from_json(Source::Pubmed, FIXTURES).unwrap();
        let hits = provider
            .search(&Query::new("carcinoma", Source::Pubmed).with_max_results(1))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_skips_unknown_ids() {
        let provider = StaticProvider::from_json(Source::Pubmed, FIXTURES).unwrap();
        let docs = provider
            .fetch(&["3".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].url, "pubmed:3");
        assert_eq!(docs[0].source, Source::Pubmed);
    }

    #[test]
    fn test_bad_fixture_is_malformed() {
        let err = StaticProvider::from_json(Source::Pubmed, "{").err().unwrap();
        assert!(!err.is_transient());
    }
}
