//! Referential integrity of concept relations.

use std::collections::BTreeSet;

use super::{Check, CheckInput};
use crate::report::{ErrorKind, ValidationIssue};

pub struct ReferenceCheck;

impl Check for ReferenceCheck {
    fn kind(&self) -> ErrorKind {
        ErrorKind::DanglingReference
    }

    fn run(&self, input: &CheckInput<'_>) -> Vec<ValidationIssue> {
        let known: BTreeSet<&str> = input.concepts().iter().map(|c| c.id.as_str()).collect();
        let mut issues = Vec::new();

        for concept in input.concepts() {
            let relations: [(&str, &Vec<String>); 3] = [
                ("parents", &concept.parents),
                ("exclusive_with", &concept.exclusive_with),
                ("co_occurs_with", &concept.co_occurs_with),
            ];

            for (field, targets) in relations {
                let mut reported: BTreeSet<&str> = BTreeSet::new();
                for target in targets {
                    if known.contains(target.as_str()) || !reported.insert(target.as_str()) {
                        continue;
                    }
                    issues.push(
                        ValidationIssue::new(
                            ErrorKind::DanglingReference,
                            format!(
                                "concept '{}' references unknown concept '{}' in {}",
                                concept.id, target, field
                            ),
                        )
                        .with_concepts([concept.id.as_str(), target.as_str()]),
                    );
                }
            }
        }

        issues
    }
}
