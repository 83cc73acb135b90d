//! Crossref REST API.
//!
//! Works are keyed by DOI. A works query returns full metadata, so `fetch`
//! serves from what `search` saw and looks up the rest with a `doi:` filter.
//! Abstracts arrive as JATS markup and are reduced to plain text.

use async_trait::async_trait;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::http;
use super::{EvidenceProvider, ProviderFault, RawDocument, RawHit};
use crate::config::CrossrefSection;
use crate::records::{Query, Source};

pub const CROSSREF_WORKS_URL: &str = "https://api.crossref.org/works";

const SNIPPET_WIDTH: usize = 800;

lazy_static! {
    static ref TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
}

/// Unescape common entities, then replace tags with spaces.
fn strip_html(text: &str) -> String {
    let unescaped = text
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");
    TAG.replace_all(&unescaped, " ").into_owned()
}

#[derive(Debug, Clone)]
pub struct CrossrefConfig {
    pub works_url: String,
    pub mailto: Option<String>,
    pub min_interval: Duration,
    pub timeout: Duration,
}

impl Default for CrossrefConfig {
    fn default() -> Self {
        Self::from(&CrossrefSection::default())
    }
}

impl From<&CrossrefSection> for CrossrefConfig {
    fn from(section: &CrossrefSection) -> Self {
        Self {
            works_url: CROSSREF_WORKS_URL.to_string(),
            mailto: section.mailto.clone(),
            min_interval: section.min_interval,
            timeout: section.timeout,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorksBody {
    #[serde(default)]
    message: WorksMessage,
}

#[derive(Debug, Deserialize, Default)]
struct WorksMessage {
    #[serde(default)]
    items: Vec<Work>,
}

#[derive(Debug, Deserialize, Default)]
struct DateParts {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Option<i64>>>,
}

#[derive(Debug, Deserialize)]
struct License {
    #[serde(rename = "URL")]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Work {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(default)]
    title: Vec<String>,
    #[serde(rename = "URL")]
    url: Option<String>,
    #[serde(default)]
    issued: DateParts,
    #[serde(default)]
    license: Vec<License>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    #[serde(rename = "container-title", default)]
    container_title: Vec<String>,
}

impl Work {
    fn published(&self) -> Option<String> {
        let parts: Vec<String> = self
            .issued
            .date_parts
            .first()?
            .iter()
            .flatten()
            .map(|part| part.to_string())
            .collect();
        (!parts.is_empty()).then(|| parts.join("-"))
    }

    fn into_document(self) -> Option<RawDocument> {
        let doi = self.doi.clone().filter(|d| !d.is_empty())?;
        let title = self.title.first().cloned().unwrap_or_default();
        let abstract_text = self.abstract_text.as_deref().map(strip_html).unwrap_or_default();
        let snippet = if abstract_text.trim().is_empty() {
            title.as_str()
        } else {
            abstract_text.as_str()
        };

        Some(RawDocument {
            snippet: http::shorten(snippet, SNIPPET_WIDTH),
            source: Source::Crossref,
            url: self
                .url
                .clone()
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| format!("https://doi.org/{}", doi)),
            published: self.published(),
            license: self.license.first().and_then(|l| l.url.clone()).filter(|l| !l.is_empty()),
            payload: serde_json::json!({ "journal": self.container_title.first() }),
            title,
            id: doi,
        })
    }
}

fn doi_filter(ids: &[String]) -> String {
    ids.iter()
        .map(|id| format!("doi:{}", id))
        .collect::<Vec<_>>()
        .join(",")
}

pub struct CrossrefProvider {
    config: CrossrefConfig,
    client: reqwest::Client,
    seen: Mutex<HashMap<String, RawDocument>>,
}

impl CrossrefProvider {
    pub fn new(config: CrossrefConfig) -> Result<Self, ProviderFault> {
        Ok(Self {
            config,
            client: http::client()?,
            seen: Mutex::new(HashMap::new()),
        })
    }

    async fn works(&self, params: &[(&str, String)], rows: u32) -> Result<Vec<RawDocument>, ProviderFault> {
        let mut request = self
            .client
            .get(&self.config.works_url)
            .query(params)
            .query(&[("rows", rows.to_string())]);
        if let Some(mailto) = &self.config.mailto {
            request = request.query(&[("mailto", mailto.as_str())]);
        }
        let body: WorksBody = http::send_json(request, self.config.timeout).await?;

        let documents: Vec<RawDocument> = body
            .message
            .items
            .into_iter()
            .take(rows as usize)
            .filter_map(Work::into_document)
            .collect();

        let mut seen = self.seen.lock();
        for doc in &documents {
            seen.insert(doc.id.clone(), doc.clone());
        }
        Ok(documents)
    }
}

#[async_trait]
impl EvidenceProvider for CrossrefProvider {
    fn source(&self) -> Source {
        Source::Crossref
    }

    async fn search(&self, query: &Query) -> Result<Vec<RawHit>, ProviderFault> {
        let documents = self
            .works(&[("query", query.keyword.clone())], query.max_results)
            .await?;
        Ok(documents
            .into_iter()
            .map(|doc| RawHit {
                id: doc.id,
                title: doc.title,
            })
            .collect())
    }

    async fn fetch(&self, ids: &[String]) -> Result<Vec<RawDocument>, ProviderFault> {
        let missing: Vec<String> = {
            let seen = self.seen.lock();
            ids.iter().filter(|id| !seen.contains_key(*id)).cloned().collect()
        };

        if !missing.is_empty() {
            self.works(&[("filter", doi_filter(&missing))], missing.len() as u32)
                .await?;
        }

        let seen = self.seen.lock();
        Ok(ids.iter().filter_map(|id| seen.get(id).cloned()).collect())
    }

    fn request_timeout(&self) -> Duration {
        self.config.timeout
    }

    fn min_interval(&self) -> Duration {
        self.config.min_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn work(value: serde_json::Value) -> Work {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_work_with_full_metadata() {
        let doc = work(serde_json::json!({
            "DOI": "10.1097/PAS.0000000000001234",
            "title": ["Papillary lesions of the breast"],
            "URL": "https://doi.org/10.1097/PAS.0000000000001234",
            "issued": {"date-parts": [[2019, 5, 1]]},
            "license": [{"URL": "https://creativecommons.org/licenses/by/4.0/", "content-version": "vor"}],
            "abstract": "<jats:p>Fibrovascular &amp; <jats:italic>myoepithelial</jats:italic> cores.</jats:p>",
            "container-title": ["Am J Surg Pathol"]
        }))
        .into_document()
        .unwrap();

        assert_eq!(doc.id, "10.1097/PAS.0000000000001234");
        assert_eq!(doc.source, Source::Crossref);
        assert_eq!(doc.title, "Papillary lesions of the breast");
        assert_eq!(doc.published.as_deref(), Some("2019-5-1"));
        assert_eq!(
            doc.license.as_deref(),
            Some("https://creativecommons.org/licenses/by/4.0/")
        );
        assert_eq!(doc.snippet, "Fibrovascular & myoepithelial cores.");
        assert_eq!(doc.payload["journal"], "Am J Surg Pathol");
    }

    #[test]
    fn test_work_with_sparse_metadata() {
        let doc = work(serde_json::json!({
            "DOI": "10.1000/xyz",
            "title": ["Radial scar"],
            "issued": {"date-parts": [[null]]}
        }))
        .into_document()
        .unwrap();

        assert_eq!(doc.url, "https://doi.org/10.1000/xyz");
        assert_eq!(doc.snippet, "Radial scar");
        assert!(doc.published.is_none());
        assert!(doc.license.is_none());
    }

    #[test]
    fn test_work_without_doi_is_skipped() {
        assert!(work(serde_json::json!({"title": ["orphan"]})).into_document().is_none());
    }

    #[test]
    fn test_strip_html() {
        let text = strip_html("&lt;b&gt;bold&lt;/b&gt; <i>and</i> plain");
        assert!(!text.contains('<'));
        assert_eq!(text.split_whitespace().collect::<Vec<_>>(), vec!["bold", "and", "plain"]);
    }

    #[test]
    fn test_doi_filter() {
        let ids = vec!["10.1/a".to_string(), "10.2/b".to_string()];
        assert_eq!(doi_filter(&ids), "doi:10.1/a,doi:10.2/b");
    }

    #[test]
    fn test_empty_works_body() {
        let body: WorksBody = serde_json::from_value(serde_json::json!({"status": "ok"})).unwrap();
        assert!(body.message.items.is_empty());
    }
}
