//! Duplicate synonym check.

use std::collections::BTreeMap;

use super::{Check, CheckInput};
use crate::concept::normalize_term;
use crate::report::{ErrorKind, ValidationIssue};

/// Flags synonyms of one concept that are equal after case and whitespace
/// normalization.
pub struct SynonymCheck;

impl Check for SynonymCheck {
    fn kind(&self) -> ErrorKind {
        ErrorKind::DuplicateSynonym
    }

    fn run(&self, input: &CheckInput<'_>) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        for concept in input.concepts() {
            let mut groups: BTreeMap<String, Vec<&str>> = BTreeMap::new();
            for synonym in &concept.synonyms {
                groups
                    .entry(normalize_term(synonym))
                    .or_default()
                    .push(synonym.as_str());
            }

            for (normalized, spellings) in groups {
                if spellings.len() > 1 {
                    let quoted: Vec<String> =
                        spellings.iter().map(|s| format!("'{}'", s)).collect();
                    issues.push(
                        ValidationIssue::new(
                            ErrorKind::DuplicateSynonym,
                            format!(
                                "concept '{}' repeats synonym '{}' ({})",
                                concept.id,
                                normalized,
                                quoted.join(", ")
                            ),
                        )
                        .with_concepts([concept.id.as_str()]),
                    );
                }
            }
        }

        issues
    }
}
