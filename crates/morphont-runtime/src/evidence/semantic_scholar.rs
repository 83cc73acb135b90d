//! Semantic Scholar Graph API.
//!
//! Paper search returns full records, so `search` keeps them and `fetch`
//! serves from that map. Unseen paper ids go through the batch endpoint.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::http;
use super::{EvidenceProvider, ProviderFault, RawDocument, RawHit};
use crate::config::SemanticScholarSection;
use crate::llm::ApiCredential;
use crate::records::{Query, Source};

pub const SEMANTIC_SCHOLAR_BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";

const FIELDS: &str = "title,abstract,year,url,openAccessPdf,externalIds";

const SNIPPET_WIDTH: usize = 800;

#[derive(Debug)]
pub struct SemanticScholarConfig {
    pub base_url: String,
    pub api_key: Option<ApiCredential>,
    pub min_interval: Duration,
    pub timeout: Duration,
}

impl Default for SemanticScholarConfig {
    fn default() -> Self {
        Self::from(&SemanticScholarSection::default())
    }
}

impl From<&SemanticScholarSection> for SemanticScholarConfig {
    fn from(section: &SemanticScholarSection) -> Self {
        Self {
            base_url: SEMANTIC_SCHOLAR_BASE_URL.to_string(),
            api_key: section
                .api_key
                .as_ref()
                .map(|key| key.credential("Semantic Scholar API key")),
            min_interval: section.min_interval,
            timeout: section.timeout,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    #[serde(default)]
    data: Vec<Paper>,
}

#[derive(Debug, Deserialize)]
struct OpenAccessPdf {
    url: Option<String>,
    license: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Paper {
    paper_id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    year: Option<i32>,
    url: Option<String>,
    open_access_pdf: Option<OpenAccessPdf>,
    #[serde(default)]
    external_ids: serde_json::Value,
}

impl Paper {
    fn into_document(self) -> Option<RawDocument> {
        let id = self.paper_id.filter(|id| !id.is_empty())?;
        let (pdf_url, license) = match self.open_access_pdf {
            Some(pdf) => (pdf.url.filter(|u| !u.is_empty()), pdf.license),
            None => (None, None),
        };
        let url = pdf_url
            .or(self.url.filter(|u| !u.is_empty()))
            .unwrap_or_else(|| format!("https://www.semanticscholar.org/paper/{}", id));
        let snippet = self
            .abstract_text
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .unwrap_or(&self.title);

        Some(RawDocument {
            snippet: http::shorten(snippet, SNIPPET_WIDTH),
            source: Source::SemanticScholar,
            url,
            published: self.year.map(|y| y.to_string()),
            license: license.filter(|l| !l.is_empty()),
            payload: serde_json::json!({ "external_ids": self.external_ids }),
            title: self.title,
            id,
        })
    }
}

pub struct SemanticScholarProvider {
    config: SemanticScholarConfig,
    client: reqwest::Client,
    seen: Mutex<HashMap<String, RawDocument>>,
}

impl SemanticScholarProvider {
    pub fn new(config: SemanticScholarConfig) -> Result<Self, ProviderFault> {
        Ok(Self {
            config,
            client: http::client()?,
            seen: Mutex::new(HashMap::new()),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.header("x-api-key", key.expose()),
            None => request,
        }
    }

    fn remember(&self, papers: Vec<Paper>) -> Vec<RawDocument> {
        let documents: Vec<RawDocument> = papers.into_iter().filter_map(Paper::into_document).collect();
        let mut seen = self.seen.lock();
        for doc in &documents {
            seen.insert(doc.id.clone(), doc.clone());
        }
        documents
    }
}

#[async_trait]
impl EvidenceProvider for SemanticScholarProvider {
    fn source(&self) -> Source {
        Source::SemanticScholar
    }

    async fn search(&self, query: &Query) -> Result<Vec<RawHit>, ProviderFault> {
        let request = self.authorize(
            self.client
                .get(format!("{}/paper/search", self.config.base_url))
                .query(&[
                    ("query", query.keyword.clone()),
                    ("limit", query.max_results.to_string()),
                    ("fields", FIELDS.to_string()),
                ]),
        );
        let body: SearchBody = http::send_json(request, self.config.timeout).await?;

        let papers = body.data.into_iter().take(query.max_results as usize).collect();
        Ok(self
            .remember(papers)
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
            let request = self.authorize(
                self.client
                    .post(format!("{}/paper/batch", self.config.base_url))
                    .query(&[("fields", FIELDS)])
                    .json(&serde_json::json!({ "ids": missing })),
            );
            // Unknown ids come back as nulls in their slot.
            let papers: Vec<Option<Paper>> = http::send_json(request, self.config.timeout).await?;
            self.remember(papers.into_iter().flatten().collect());
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
