//! Structural check: JSON, schema conformance and unique ids.

use std::collections::BTreeMap;

use super::{Check, CheckInput};
use crate::report::{ErrorKind, ValidationIssue};
use crate::schema::schema_violations;

pub struct StructureCheck;

impl Check for StructureCheck {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Schema
    }

    fn run(&self, input: &CheckInput<'_>) -> Vec<ValidationIssue> {
        let parsed = input.parsed;

        let value = match (&parsed.value, &parsed.parse_error) {
            (Some(value), _) => value,
            (None, reason) => {
                let reason = reason.as_deref().unwrap_or("empty output");
                return vec![ValidationIssue::new(
                    ErrorKind::Schema,
                    format!("output is not valid JSON: {}", reason),
                )];
            }
        };

        let mut issues = Vec::new();

        let violations = match schema_violations(value) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "ontology schema unavailable");
                return vec![ValidationIssue::new(ErrorKind::Schema, e.to_string())];
            }
        };
        for violation in &violations {
            issues.push(ValidationIssue::new(ErrorKind::Schema, violation.message.clone()));
        }

        // Decode failures the schema already explained are not repeated.
        for (index, reason) in &parsed.decode_failures {
            let prefix = format!("/concepts/{}", index);
            let covered = violations.iter().any(|v| {
                v.instance_path == prefix || v.instance_path.starts_with(&format!("{}/", prefix))
            });
            if !covered {
                issues.push(ValidationIssue::new(
                    ErrorKind::Schema,
                    format!("concept at index {} could not be read: {}", index, reason),
                ));
            }
        }

        let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
        for concept in input.concepts() {
            *seen.entry(concept.id.as_str()).or_default() += 1;
        }
        for (id, count) in seen {
            if count > 1 {
                issues.push(
                    ValidationIssue::new(
                        ErrorKind::Schema,
                        format!("concept id '{}' is used by {} concepts", id, count),
                    )
                    .with_concepts([id]),
                );
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::{CandidateDocument, ConceptSpec};
    use crate::checks::test_support::run_on;
    use crate::validator::ValidationRules;

    fn run_raw(raw: &str) -> Vec<ValidationIssue> {
        let parsed = CandidateDocument::new(raw).parse();
        StructureCheck.run(&CheckInput {
            parsed: &parsed,
            rules: &ValidationRules::default(),
        })
    }

    #[test]
    fn test_non_json_is_one_schema_error() {
        let issues = run_raw("no json here");
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("not valid JSON"));
    }

    #[test]
    fn test_duplicate_ids() {
        let issues = run_on(
            &StructureCheck,
            vec![
                ConceptSpec::new("a", "A").with_definition("x"),
                ConceptSpec::new("a", "Another A").with_definition("y"),
            ],
            &ValidationRules::default(),
        );
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].concept_ids, vec!["a".to_string()]);
    }

    #[test]
    fn test_decode_failure_not_duplicated() {
        let issues = run_raw(r#"{"concepts": [{"id": "a", "name": "A", "definition": "x", "extra": 1}]}"#);
        assert_eq!(issues.len(), 1, "{:?}", issues);
    }

    #[test]
    fn test_missing_definition_is_reported() {
        let issues = run_raw(r#"[{"id": "a", "name": "A"}]"#);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, ErrorKind::Schema);
    }
}
