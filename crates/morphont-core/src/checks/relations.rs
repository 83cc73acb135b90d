//! Conflicting relation check.
//!
//! Two concepts cannot be both mutually exclusive and co-occurring, whichever
//! side declared each relation, and a concept cannot exclude itself.

use std::collections::BTreeSet;

use super::{Check, CheckInput};
use crate::report::{ErrorKind, ValidationIssue};

pub struct RelationCheck;

fn pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Check for RelationCheck {
    fn kind(&self) -> ErrorKind {
        ErrorKind::ConflictingRelation
    }

    fn run(&self, input: &CheckInput<'_>) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let mut exclusive: BTreeSet<(&str, &str)> = BTreeSet::new();
        let mut co_occurring: BTreeSet<(&str, &str)> = BTreeSet::new();
        let mut self_excluding: BTreeSet<&str> = BTreeSet::new();

        for concept in input.concepts() {
            let id = concept.id.as_str();
            for other in &concept.exclusive_with {
                if other == id {
                    self_excluding.insert(id);
                } else {
                    exclusive.insert(pair(id, other));
                }
            }
            for other in &concept.co_occurs_with {
                if other != id {
                    co_occurring.insert(pair(id, other));
                }
            }
        }

        for id in self_excluding {
            issues.push(
                ValidationIssue::new(
                    ErrorKind::ConflictingRelation,
                    format!("concept '{}' lists itself in exclusive_with", id),
                )
                .with_concepts([id]),
            );
        }

        for (a, b) in exclusive.intersection(&co_occurring) {
            issues.push(
                ValidationIssue::new(
                    ErrorKind::ConflictingRelation,
                    format!(
                        "concepts '{}' and '{}' are declared both exclusive and co-occurring",
                        a, b
                    ),
                )
                .with_concepts([*a, *b]),
            );
        }

        issues
    }
}
