//! Evidence providers.
//!
//! A provider wraps one literature backend behind a two-phase interface:
//! `search` turns a [`Query`] into lightweight hits, `fetch` turns hit ids
//! into full documents. Providers only classify their failures; timeouts,
//! retries, pacing and caching are applied uniformly by the
//! [`EvidenceGateway`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;

use crate::records::{Query, ResultRecord, Source};

mod gateway;
mod registry;
mod static_provider;

#[cfg(any(
    feature = "pubmed",
    feature = "europe-pmc",
    feature = "semantic-scholar",
    feature = "crossref"
))]
mod http;

#[cfg(feature = "pubmed")]
mod pubmed;

#[cfg(feature = "europe-pmc")]
mod europe_pmc;

#[cfg(feature = "semantic-scholar")]
mod semantic_scholar;

#[cfg(feature = "crossref")]
mod crossref;

pub use gateway::EvidenceGateway;
pub use registry::EvidenceRegistry;
pub use static_provider::StaticProvider;

#[cfg(feature = "pubmed")]
pub use pubmed::{PubMedConfig, PubMedProvider};

#[cfg(feature = "europe-pmc")]
pub use europe_pmc::{EuropePmcConfig, EuropePmcProvider};

#[cfg(feature = "semantic-scholar")]
pub use semantic_scholar::{SemanticScholarConfig, SemanticScholarProvider};

#[cfg(feature = "crossref")]
pub use crossref::{CrossrefConfig, CrossrefProvider};

/// A search hit before its document is fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawHit {
    /// Backend-specific document id (PMID, PMCID, DOI, ...)
    pub id: String,

    #[serde(default)]
    pub title: String,
}

/// A fetched document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub id: String,
    pub source: Source,
    pub title: String,
    pub url: String,

    #[serde(default)]
    pub published: Option<String>,

    #[serde(default)]
    pub license: Option<String>,

    /// Abstract or summary text handed to the model
    #[serde(default)]
    pub snippet: String,

    #[serde(default)]
    pub payload: JsonValue,
}

impl RawDocument {
    /// The store's view of this document. The id and source ride along in
    /// the payload so the document can be rebuilt from the cache.
    pub fn to_result_record(&self) -> ResultRecord {
        let mut payload = match &self.payload {
            JsonValue::Object(map) => map.clone(),
            JsonValue::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("raw".to_string(), other.clone());
                map
            }
        };
        payload.insert("id".to_string(), JsonValue::String(self.id.clone()));
        payload.insert(
            "source".to_string(),
            JsonValue::String(self.source.as_str().to_string()),
        );

        ResultRecord {
            title: self.title.clone(),
            url: self.url.clone(),
            published: self.published.clone(),
            license: self.license.clone(),
            snippet: self.snippet.clone(),
            payload: JsonValue::Object(payload),
        }
    }

    /// Rebuild a document from a cached result.
    pub fn from_result_record(source: &Source, record: &ResultRecord) -> Self {
        let id = record
            .payload
            .get("id")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| record.url.clone());

        Self {
            id,
            source: source.clone(),
            title: record.title.clone(),
            url: record.url.clone(),
            published: record.published.clone(),
            license: record.license.clone(),
            snippet: record.snippet.clone(),
            payload: record.payload.clone(),
        }
    }
}

/// Failure of a single backend call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderFault {
    #[error("network error: {0}")]
    Network(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("malformed request or response: {0}")]
    Malformed(String),
}

impl ProviderFault {
    /// Transient faults are worth retrying; the rest fail the query at once.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderFault::Network(_) | ProviderFault::Timeout(_) | ProviderFault::RateLimited { .. } => true,
            ProviderFault::Status { status, .. } => *status >= 500 || *status == 408,
            ProviderFault::Auth(_) | ProviderFault::Malformed(_) => false,
        }
    }
}

/// A query that could not be answered.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("query {query} failed after {attempts} attempt(s): {fault}")]
    Query {
        query: Box<Query>,
        attempts: u32,
        #[source]
        fault: ProviderFault,
    },

    #[error("no evidence provider registered for source '{0}'")]
    UnknownSource(Source),
}

impl ProviderError {
    /// The query that failed, if the failure came from a backend.
    pub fn query(&self) -> Option<&Query> {
        match self {
            ProviderError::Query { query, .. } => Some(query.as_ref()),
            ProviderError::UnknownSource(_) => None,
        }
    }
}

/// One literature backend.
#[async_trait]
pub trait EvidenceProvider: Send + Sync {
    /// The source this provider answers for.
    fn source(&self) -> Source;

    /// Find candidate documents for a query.
    async fn search(&self, query: &Query) -> Result<Vec<RawHit>, ProviderFault>;

    /// Fetch full documents for hit ids. Unknown ids are skipped.
    async fn fetch(&self, ids: &[String]) -> Result<Vec<RawDocument>, ProviderFault>;

    /// Upper bound on a single backend call.
    fn request_timeout(&self) -> Duration {
        Duration::from_secs(20)
    }

    /// Minimum spacing between calls to this backend.
    fn min_interval(&self) -> Duration {
        Duration::ZERO
    }
}
