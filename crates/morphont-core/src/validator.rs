//! The ontology validator.
//!
//! Runs every check over a candidate and folds the issues into one
//! [`ValidationReport`]. Checks never short-circuit: a candidate that is
//! schema-invalid still gets cycle, reference and relation findings for the
//! concepts that could be read.

use serde::{Deserialize, Serialize};

use crate::checks::{default_checks, Check, CheckInput};
use crate::concept::CandidateDocument;
use crate::repair::changed_fields;
use crate::report::ValidationReport;

/// Per-run validation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationRules {
    /// Classes that must each be covered by enough concepts
    pub classes: Vec<String>,

    /// Minimum concepts per class (or in total when `classes` is empty)
    pub min_concepts_per_class: usize,

    /// Minimum positive cues per concept
    pub min_positives: usize,

    /// Minimum negative cues per concept
    pub min_negatives: usize,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            classes: Vec::new(),
            min_concepts_per_class: 1,
            min_positives: 0,
            min_negatives: 0,
        }
    }
}

impl ValidationRules {
    pub fn with_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.classes = classes.into_iter().map(Into::into).collect();
        self
    }
}

/// Validates candidates against the schema and the domain invariants.
pub struct Validator {
    rules: ValidationRules,
    checks: Vec<Box<dyn Check>>,
}

impl Validator {
    /// Create a validator with the standard checks.
    pub fn new(rules: ValidationRules) -> Self {
        Self {
            rules,
            checks: default_checks(),
        }
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    /// Validate a candidate.
    pub fn validate(&self, candidate: &CandidateDocument) -> ValidationReport {
        let parsed = candidate.parse();
        let input = CheckInput {
            parsed: &parsed,
            rules: &self.rules,
        };

        let mut errors = Vec::new();
        for check in &self.checks {
            let issues = check.run(&input);
            if !issues.is_empty() {
                tracing::debug!(check = %check.kind(), count = issues.len(), "check reported issues");
            }
            errors.extend(issues);
        }

        ValidationReport::from_issues(errors)
    }

    /// Validate a repaired candidate and record which fields changed
    /// relative to `previous`.
    pub fn validate_repair(
        &self,
        candidate: &CandidateDocument,
        previous: &CandidateDocument,
    ) -> ValidationReport {
        let mut report = self.validate(candidate);
        report.repaired_fields =
            changed_fields(&previous.parse().concepts, &candidate.parse().concepts);
        report
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(ValidationRules::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ErrorKind;

    #[test]
    fn test_all_checks_run_without_short_circuit() {
        // Schema-invalid (extra field on c), cyclic, dangling and conflicting at once.
        let raw = r#"{
  "concepts": [
    {"id": "a", "name": "A", "definition": "x", "parents": ["b"], "exclusive_with": ["b"], "co_occurs_with": ["b"]},
    {"id": "b", "name": "B", "definition": "y", "parents": ["a", "ghost"], "synonyms": ["Foo", "foo"]},
    {"id": "c", "name": "C", "definition": "z", "bogus": true}
  ]
}"#;
        let validator = Validator::new(ValidationRules {
            min_concepts_per_class: 5,
            ..ValidationRules::default()
        });
        let report = validator.validate(&CandidateDocument::new(raw));

        assert!(!report.valid);
        for kind in [
            ErrorKind::Schema,
            ErrorKind::Cardinality,
            ErrorKind::DuplicateSynonym,
            ErrorKind::Cycle,
            ErrorKind::DanglingReference,
            ErrorKind::ConflictingRelation,
        ] {
            assert!(report.has_kind(kind), "missing {:?} in {:?}", kind, report.errors);
        }
    }

    #[test]
    fn test_errors_follow_check_order() {
        let raw = r#"[
  {"id": "a", "name": "A", "definition": "x", "parents": ["a"], "co_occurs_with": ["ghost"]}
]"#;
        let report = Validator::default().validate(&CandidateDocument::new(raw));
        let kinds: Vec<ErrorKind> = report.errors.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ErrorKind::Cycle, ErrorKind::DanglingReference]);
    }

    #[test]
    fn test_validate_repair_records_changes() {
        let previous = CandidateDocument::new(
            r#"[{"id": "a", "name": "A", "definition": "x", "parents": ["a"]}]"#,
        );
        let repaired = CandidateDocument::new(r#"[{"id": "a", "name": "A", "definition": "x"}]"#);
        let report = Validator::default().validate_repair(&repaired, &previous);
        assert!(report.valid);
        assert!(report.repaired_fields.contains("a.parents"));
    }

    #[test]
    fn test_validation_is_deterministic() {
        let raw = r#"[{"id": "b", "name": "B", "definition": "x", "parents": ["a"]}, {"id": "a", "name": "A", "definition": "y", "parents": ["b"]}]"#;
        let validator = Validator::default();
        let first = validator.validate(&CandidateDocument::new(raw));
        let second = validator.validate(&CandidateDocument::new(raw));
        assert_eq!(first, second);
    }
}
