//! Records persisted by the cache store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Identifier of an evidence backend.
///
/// Literature sources the runtime knows about are variants; anything else is
/// carried verbatim so new backends can be registered without touching this
/// enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Source {
    Pubmed,
    EuropePmc,
    SemanticScholar,
    Crossref,
    Other(String),
}

impl Source {
    pub fn as_str(&self) -> &str {
        match self {
            Source::Pubmed => "pubmed",
            Source::EuropePmc => "europe_pmc",
            Source::SemanticScholar => "semantic_scholar",
            Source::Crossref => "crossref",
            Source::Other(name) => name,
        }
    }
}

impl From<String> for Source {
    fn from(name: String) -> Self {
        match name.as_str() {
            "pubmed" => Source::Pubmed,
            "europe_pmc" => Source::EuropePmc,
            "semantic_scholar" => Source::SemanticScholar,
            "crossref" => Source::Crossref,
            _ => Source::Other(name),
        }
    }
}

impl From<&str> for Source {
    fn from(name: &str) -> Self {
        Source::from(name.to_string())
    }
}

impl From<Source> for String {
    fn from(source: Source) -> Self {
        source.as_str().to_string()
    }
}

impl FromStr for Source {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Source::from(s))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default tool name for plain keyword searches.
pub const DEFAULT_TOOL: &str = "search";

/// One evidence query. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub keyword: String,
    pub source: Source,
    pub tool_name: String,
    pub max_results: u32,

    /// Backend-specific arguments; a `BTreeMap` keeps the encoding canonical
    #[serde(default)]
    pub args: BTreeMap<String, JsonValue>,
}

impl Query {
    pub fn new(keyword: impl Into<String>, source: impl Into<Source>) -> Self {
        Self {
            keyword: keyword.into(),
            source: source.into(),
            tool_name: DEFAULT_TOOL.to_string(),
            max_results: 20,
            args: BTreeMap::new(),
        }
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = tool_name.into();
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    /// Canonical JSON for `args`: keys sorted at every level.
    pub fn args_json(&self) -> String {
        let canonical: serde_json::Map<String, JsonValue> = self
            .args
            .iter()
            .map(|(k, v)| (k.clone(), canonicalize(v)))
            .collect();
        JsonValue::Object(canonical).to_string()
    }

    /// The deduplication key: everything except `max_results`.
    pub fn cache_key(&self) -> (String, String, String, String) {
        (
            self.keyword.clone(),
            self.source.as_str().to_string(),
            self.tool_name.clone(),
            self.args_json(),
        )
    }
}

/// Rebuild objects with keys inserted in sorted order.
fn canonicalize(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let sorted: BTreeMap<&String, &JsonValue> = map.iter().collect();
            JsonValue::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' @ {}", self.keyword, self.source)
    }
}

/// A persisted query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub id: i64,
    pub query: Query,
    pub requested_at: DateTime<Utc>,
}

/// One item returned by a search. Unique per search by `(title, url)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub title: String,
    pub url: String,

    #[serde(default)]
    pub published: Option<String>,

    #[serde(default)]
    pub license: Option<String>,

    #[serde(default)]
    pub snippet: String,

    /// Provider payload kept for later re-use
    #[serde(default)]
    pub payload: JsonValue,
}

/// One synthesis or repair attempt, as recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub id: i64,
    pub search_id: i64,
    pub extractor: String,
    pub keyword: String,
    pub content: JsonValue,
    pub created_at: DateTime<Utc>,
}
