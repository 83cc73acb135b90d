//! PubMed via NCBI E-utilities.
//!
//! `search` calls ESearch for a PMID list, `fetch` calls ESummary for the
//! document summaries. NCBI allows three requests per second without an API
//! key, hence the default 340ms spacing.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;

use super::http;
use super::{EvidenceProvider, ProviderFault, RawDocument, RawHit};
use crate::config::PubMedSection;
use crate::llm::ApiCredential;
use crate::records::{Query, Source};

pub const NCBI_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

const SNIPPET_WIDTH: usize = 800;

#[derive(Debug)]
pub struct PubMedConfig {
    pub base_url: String,
    pub api_key: Option<ApiCredential>,
    pub email: Option<String>,
    pub min_interval: Duration,
    pub timeout: Duration,
}

impl Default for PubMedConfig {
    fn default() -> Self {
        Self::from(&PubMedSection::default())
    }
}

impl From<&PubMedSection> for PubMedConfig {
    fn from(section: &PubMedSection) -> Self {
        Self {
            base_url: NCBI_BASE_URL.to_string(),
            api_key: section.api_key.as_ref().map(|key| key.credential("NCBI API key")),
            email: section.email.clone(),
            min_interval: section.min_interval,
            timeout: section.timeout,
        }
    }
}

pub struct PubMedProvider {
    config: PubMedConfig,
    client: reqwest::Client,
}

impl PubMedProvider {
    pub fn new(config: PubMedConfig) -> Result<Self, ProviderFault> {
        Ok(Self {
            config,
            client: http::client()?,
        })
    }

    fn request(&self, endpoint: &str, params: &[(&str, String)]) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .get(format!("{}/{}", self.config.base_url, endpoint))
            .query(&[("db", "pubmed"), ("retmode", "json"), ("tool", "morphont")])
            .query(params);
        if let Some(key) = &self.config.api_key {
            request = request.query(&[("api_key", key.expose())]);
        }
        if let Some(email) = &self.config.email {
            request = request.query(&[("email", email.as_str())]);
        }
        request
    }
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    esearchresult: SearchResult,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    idlist: Vec<String>,
}

fn parse_search(body: SearchEnvelope) -> Vec<RawHit> {
    body.esearchresult
        .idlist
        .into_iter()
        .map(|id| RawHit {
            id,
            title: String::new(),
        })
        .collect()
}

fn text_field<'a>(record: &'a JsonValue, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| record.get(*key).and_then(JsonValue::as_str))
        .find(|value| !value.trim().is_empty())
}

/// Documents from an ESummary body, in `uids` order.
fn parse_summaries(body: &JsonValue) -> Result<Vec<RawDocument>, ProviderFault> {
    let result = body
        .get("result")
        .ok_or_else(|| ProviderFault::Malformed("esummary response has no result".to_string()))?;

    let uids = result
        .get("uids")
        .and_then(JsonValue::as_array)
        .map(|uids| uids.iter().filter_map(JsonValue::as_str).collect::<Vec<_>>())
        .unwrap_or_default();

    let mut documents = Vec::with_capacity(uids.len());
    for uid in uids {
        let Some(record) = result.get(uid) else {
            continue;
        };
        if record.get("error").is_some() {
            continue;
        }

        let title = text_field(record, &["title"]).unwrap_or_default().to_string();
        let journal = text_field(record, &["fulljournalname", "source"]).unwrap_or_default();
        let published = text_field(record, &["pubdate", "epubdate"]).map(str::to_string);
        let summary = [title.as_str(), journal, published.as_deref().unwrap_or_default()]
            .iter()
            .map(|part| part.trim().trim_end_matches('.'))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(". ");

        documents.push(RawDocument {
            id: uid.to_string(),
            source: Source::Pubmed,
            url: format!("https://pubmed.ncbi.nlm.nih.gov/{}/", uid),
            title,
            published,
            license: None,
            snippet: http::shorten(&summary, SNIPPET_WIDTH),
            payload: serde_json::json!({
                "journal": journal,
                "elocationid": text_field(record, &["elocationid"]),
            }),
        });
    }
    Ok(documents)
}

#[async_trait]
impl EvidenceProvider for PubMedProvider {
    fn source(&self) -> Source {
        Source::Pubmed
    }

    async fn search(&self, query: &Query) -> Result<Vec<RawHit>, ProviderFault> {
        let request = self.request(
            "esearch.fcgi",
            &[
                ("term", query.keyword.clone()),
                ("retmax", query.max_results.to_string()),
            ],
        );
        let body: SearchEnvelope = http::send_json(request, self.config.timeout).await?;
        Ok(parse_search(body))
    }

    async fn fetch(&self, ids: &[String]) -> Result<Vec<RawDocument>, ProviderFault> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let request = self.request("esummary.fcgi", &[("id", ids.join(","))]);
        let body: JsonValue = http::send_json(request, self.config.timeout).await?;
        parse_summaries(&body)
    }

    fn request_timeout(&self) -> Duration {
        self.config.timeout
    }

    fn min_interval(&self) -> Duration {
        self.config.min_interval
    }
}
