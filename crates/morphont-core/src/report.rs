//! Validation report types.
//!
//! A [`ValidationReport`] is data, not an error: a failing candidate is an
//! expected outcome that drives the repair loop.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Category of a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Not JSON, not schema-conformant, or structurally broken (duplicate ids)
    Schema,
    /// Too few concepts for a class, or too few cues on a concept
    Cardinality,
    DuplicateSynonym,
    /// `parents` does not form a DAG
    Cycle,
    /// A relation names an id that does not exist
    DanglingReference,
    /// Contradictory relations between two concepts
    ConflictingRelation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Schema => "schema",
            ErrorKind::Cardinality => "cardinality",
            ErrorKind::DuplicateSynonym => "duplicate_synonym",
            ErrorKind::Cycle => "cycle",
            ErrorKind::DanglingReference => "dangling_reference",
            ErrorKind::ConflictingRelation => "conflicting_relation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub kind: ErrorKind,

    /// Human-readable description, fed verbatim into repair prompts
    pub message: String,

    /// Every concept id the failure involves
    #[serde(default)]
    pub concept_ids: Vec<String>,
}

impl ValidationIssue {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            concept_ids: Vec::new(),
        }
    }

    pub fn with_concepts<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.concept_ids.extend(ids.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Outcome of validating one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// True iff `errors` is empty
    pub valid: bool,

    pub errors: Vec<ValidationIssue>,

    /// `<concept id>.<field>` entries changed relative to the previous
    /// candidate; a bare `<concept id>` marks an added or dropped concept
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub repaired_fields: BTreeSet<String>,
}

impl ValidationReport {
    /// Build a report from collected issues.
    pub fn from_issues(errors: Vec<ValidationIssue>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            repaired_fields: BTreeSet::new(),
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }

    pub fn issues_of(&self, kind: ErrorKind) -> impl Iterator<Item = &ValidationIssue> {
        self.errors.iter().filter(move |e| e.kind == kind)
    }

    /// All errors as a bullet list, one per line.
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("- {}", e))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_validity_follows_errors() {
        assert!(ValidationReport::from_issues(vec![]).valid);

        let report = ValidationReport::from_issues(vec![ValidationIssue::new(
            ErrorKind::Cycle,
            "a -> b -> a",
        )]);
        assert!(!report.valid);
        assert!(report.has_kind(ErrorKind::Cycle));
        assert!(!report.has_kind(ErrorKind::Schema));
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::DanglingReference).unwrap();
        assert_eq!(json, "\"dangling_reference\"");
        assert_eq!(ErrorKind::DuplicateSynonym.to_string(), "duplicate_synonym");
    }

    #[test]
    fn test_summary_lists_each_error() {
        let report = ValidationReport::from_issues(vec![
            ValidationIssue::new(ErrorKind::Schema, "first"),
            ValidationIssue::new(ErrorKind::Cardinality, "second"),
        ]);
        assert_eq!(report.summary(), "- [schema] first\n- [cardinality] second");
    }
}
