//! Ontology data model.
//!
//! A [`CandidateDocument`] is whatever the model produced. Parsing it never
//! fails outright: the [`ParsedCandidate`] keeps the JSON value (if any), the
//! concepts that decoded cleanly and the per-element decode failures, so the
//! validator can report on everything at once.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

lazy_static! {
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Normalize a term for comparison: lowercase, trimmed, inner whitespace
/// collapsed to a single space.
pub fn normalize_term(term: &str) -> String {
    WHITESPACE
        .replace_all(term.trim(), " ")
        .to_lowercase()
}

/// A single ontology concept.
///
/// Set-valued fields are lists so duplicates survive deserialization and can
/// be reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConceptSpec {
    /// Stable identifier, unique within a document
    pub id: String,

    /// Display name
    pub name: String,

    #[serde(default)]
    pub definition: String,

    #[serde(default)]
    pub synonyms: Vec<String>,

    /// Top-level class this concept belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_a: Option<String>,

    /// Parent concept ids (must form a DAG)
    #[serde(default)]
    pub parents: Vec<String>,

    #[serde(default)]
    pub exclusive_with: Vec<String>,

    #[serde(default)]
    pub co_occurs_with: Vec<String>,

    #[serde(default)]
    pub examples: Vec<String>,

    /// Hallmark morphology cues
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub positives: Vec<String>,

    /// Confounders that argue against the concept
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub negatives: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub magnifications: Vec<String>,
}

impl ConceptSpec {
    /// Create a concept with only the required fields set.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            definition: String::new(),
            synonyms: Vec::new(),
            is_a: None,
            parents: Vec::new(),
            exclusive_with: Vec::new(),
            co_occurs_with: Vec::new(),
            examples: Vec::new(),
            positives: Vec::new(),
            negatives: Vec::new(),
            magnifications: Vec::new(),
        }
    }

    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = definition.into();
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parents.push(parent.into());
        self
    }

    pub fn with_synonym(mut self, synonym: impl Into<String>) -> Self {
        self.synonyms.push(synonym.into());
        self
    }

    pub fn with_is_a(mut self, class: impl Into<String>) -> Self {
        self.is_a = Some(class.into());
        self
    }

    pub fn exclusive_with(mut self, other: impl Into<String>) -> Self {
        self.exclusive_with.push(other.into());
        self
    }

    pub fn co_occurs_with(mut self, other: impl Into<String>) -> Self {
        self.co_occurs_with.push(other.into());
        self
    }
}

/// Document-level metadata of a finalized ontology.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub dataset: String,

    #[serde(default)]
    pub notes: String,
}

/// The artifact produced when a run finalizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OntologyDocument {
    pub concepts: Vec<ConceptSpec>,
    pub metadata: DocumentMetadata,
}

impl OntologyDocument {
    /// Serialize as indented JSON.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Look up a concept by id.
    pub fn concept(&self, id: &str) -> Option<&ConceptSpec> {
        self.concepts.iter().find(|c| c.id == id)
    }
}

/// Raw model output that has not been validated yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateDocument {
    raw: String,
}

impl CandidateDocument {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// The text exactly as the model returned it.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The JSON payload: the contents of the first fenced block if there is
    /// one, otherwise the trimmed text.
    pub fn json_text(&self) -> &str {
        FENCED_BLOCK
            .captures(&self.raw)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .unwrap_or_else(|| self.raw.trim())
    }

    /// Parse the candidate as far as it goes.
    pub fn parse(&self) -> ParsedCandidate {
        let value = match serde_json::from_str::<JsonValue>(self.json_text()) {
            Ok(value) => value,
            Err(e) => {
                return ParsedCandidate {
                    value: None,
                    parse_error: Some(e.to_string()),
                    concepts: Vec::new(),
                    decode_failures: Vec::new(),
                    metadata: None,
                }
            }
        };

        // A bare list of concepts is accepted as shorthand.
        let value = match value {
            JsonValue::Array(items) => serde_json::json!({ "concepts": items }),
            other => other,
        };

        let mut concepts = Vec::new();
        let mut decode_failures = Vec::new();
        if let Some(items) = value.get("concepts").and_then(JsonValue::as_array) {
            for (index, item) in items.iter().enumerate() {
                match serde_json::from_value::<ConceptSpec>(item.clone()) {
                    Ok(concept) => concepts.push(concept),
                    Err(e) => decode_failures.push((index, e.to_string())),
                }
            }
        }

        let metadata = value
            .get("metadata")
            .and_then(|m| serde_json::from_value::<DocumentMetadata>(m.clone()).ok());

        ParsedCandidate {
            value: Some(value),
            parse_error: None,
            concepts,
            decode_failures,
            metadata,
        }
    }
}

impl From<String> for CandidateDocument {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for CandidateDocument {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Outcome of [`CandidateDocument::parse`].
#[derive(Debug, Clone)]
pub struct ParsedCandidate {
    /// Normalized JSON value (bare arrays wrapped into `{"concepts": [...]}`)
    pub value: Option<JsonValue>,

    /// Why the text was not JSON at all
    pub parse_error: Option<String>,

    /// Concepts that decoded, in document order
    pub concepts: Vec<ConceptSpec>,

    /// `(index, reason)` for every concept element that did not decode
    pub decode_failures: Vec<(usize, String)>,

    pub metadata: Option<DocumentMetadata>,
}

impl ParsedCandidate {
    /// Build the finalized document, filling metadata gaps from `defaults`.
    pub fn into_document(self, defaults: DocumentMetadata) -> OntologyDocument {
        let metadata = match self.metadata {
            Some(found) => DocumentMetadata {
                version: if found.version.is_empty() { defaults.version } else { found.version },
                dataset: if found.dataset.is_empty() { defaults.dataset } else { found.dataset },
                notes: if found.notes.is_empty() { defaults.notes } else { found.notes },
            },
            None => defaults,
        };
        OntologyDocument {
            concepts: self.concepts,
            metadata,
        }
    }
}
