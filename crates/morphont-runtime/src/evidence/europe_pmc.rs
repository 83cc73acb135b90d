//! Europe PMC REST search.
//!
//! One search call already returns full records, so `search` keeps them and
//! `fetch` serves from that map. Ids `fetch` has not seen are looked up with
//! an id query.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::http;
use super::{EvidenceProvider, ProviderFault, RawDocument, RawHit};
use crate::config::EuropePmcSection;
use crate::records::{Query, Source};

pub const EUROPE_PMC_SEARCH_URL: &str = "https://www.ebi.ac.uk/europepmc/webservices/rest/search";

const SNIPPET_WIDTH: usize = 800;

#[derive(Debug, Clone)]
pub struct EuropePmcConfig {
    pub search_url: String,
    pub min_interval: Duration,
    pub timeout: Duration,
}

impl Default for EuropePmcConfig {
    fn default() -> Self {
        Self::from(&EuropePmcSection::default())
    }
}

impl From<&EuropePmcSection> for EuropePmcConfig {
    fn from(section: &EuropePmcSection) -> Self {
        Self {
            search_url: EUROPE_PMC_SEARCH_URL.to_string(),
            min_interval: section.min_interval,
            timeout: section.timeout,
        }
    }
}

pub struct EuropePmcProvider {
    config: EuropePmcConfig,
    client: reqwest::Client,
    seen: Mutex<HashMap<String, RawDocument>>,
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    #[serde(rename = "resultList", default)]
    result_list: ResultList,
}

#[derive(Debug, Deserialize, Default)]
struct ResultList {
    #[serde(default)]
    result: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Entry {
    id: Option<String>,
    #[serde(default)]
    title: String,
    pmcid: Option<String>,
    pmid: Option<String>,
    doi: Option<String>,
    abstract_text: Option<String>,
    first_publication_date: Option<String>,
    pub_year: Option<String>,
    license: Option<String>,
    journal_title: Option<String>,
}

impl Entry {
    fn document_id(&self) -> Option<String> {
        self.pmcid
            .clone()
            .or_else(|| self.pmid.clone())
            .or_else(|| self.id.clone())
    }

    fn into_document(self) -> Option<RawDocument> {
        let id = self.document_id()?;
        let url = match (&self.pmcid, &self.pmid) {
            (Some(pmcid), _) => format!("https://europepmc.org/article/PMC/{}", pmcid),
            (None, Some(pmid)) => format!("https://europepmc.org/abstract/MED/{}", pmid),
            (None, None) => format!("https://europepmc.org/search?query={}", id),
        };
        let snippet = self
            .abstract_text
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .unwrap_or(&self.title);

        Some(RawDocument {
            id,
            source: Source::EuropePmc,
            snippet: http::shorten(snippet, SNIPPET_WIDTH),
            url,
            published: self.first_publication_date.or(self.pub_year),
            license: self.license.filter(|l| !l.is_empty()),
            payload: serde_json::json!({
                "pmid": self.pmid,
                "pmcid": self.pmcid,
                "doi": self.doi,
                "journal": self.journal_title,
            }),
            title: self.title,
        })
    }
}

fn id_query(ids: &[String]) -> String {
    ids.iter()
        .map(|id| {
            if id.starts_with("PMC") {
                format!("PMCID:{}", id)
            } else {
                format!("EXT_ID:{}", id)
            }
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

impl EuropePmcProvider {
    pub fn new(config: EuropePmcConfig) -> Result<Self, ProviderFault> {
        Ok(Self {
            config,
            client: http::client()?,
            seen: Mutex::new(HashMap::new()),
        })
    }

    async fn query(&self, text: &str, page_size: u32) -> Result<Vec<RawDocument>, ProviderFault> {
        let request = self.client.get(&self.config.search_url).query(&[
            ("query", text.to_string()),
            ("format", "json".to_string()),
            ("resultType", "core".to_string()),
            ("pageSize", page_size.to_string()),
        ]);
        let body: SearchBody = http::send_json(request, self.config.timeout).await?;

        let documents: Vec<RawDocument> = body
            .result_list
            .result
            .into_iter()
            .take(page_size as usize)
            .filter_map(Entry::into_document)
            .collect();

        let mut seen = self.seen.lock();
        for doc in &documents {
            seen.insert(doc.id.clone(), doc.clone());
        }
        Ok(documents)
    }
}

#[async_trait]
impl EvidenceProvider for EuropePmcProvider {
    fn source(&self) -> Source {
        Source::EuropePmc
    }

    async fn search(&self, query: &Query) -> Result<Vec<RawHit>, ProviderFault> {
        let documents = self.query(&query.keyword, query.max_results).await?;
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
            self.query(&id_query(&missing), missing.len() as u32).await?;
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
