//! Cardinality check: enough concepts per requested class, enough cues per
//! concept.
//!
//! A concept counts toward a class when its `is_a` names the class, or when
//! one of its ancestors (following `parents`) has the class as its name or
//! id. Names are compared after [`normalize_term`], with `_` read as a space.

use std::collections::{BTreeMap, BTreeSet};

use super::{Check, CheckInput};
use crate::concept::{normalize_term, ConceptSpec};
use crate::report::{ErrorKind, ValidationIssue};

pub struct CardinalityCheck;

fn class_key(term: &str) -> String {
    normalize_term(&term.replace('_', " "))
}

/// Normalized class names a concept belongs to.
fn memberships<'a>(
    concept: &'a ConceptSpec,
    by_id: &BTreeMap<&'a str, &'a ConceptSpec>,
) -> BTreeSet<String> {
    let mut classes = BTreeSet::new();
    if let Some(is_a) = &concept.is_a {
        classes.insert(class_key(is_a));
    }

    let mut visited: BTreeSet<&str> = BTreeSet::new();
    let mut stack: Vec<&str> = concept.parents.iter().map(String::as_str).collect();
    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        classes.insert(class_key(id));
        if let Some(&ancestor) = by_id.get(id) {
            classes.insert(class_key(&ancestor.name));
            stack.extend(ancestor.parents.iter().map(String::as_str));
        }
    }
    classes
}

impl Check for CardinalityCheck {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Cardinality
    }

    fn run(&self, input: &CheckInput<'_>) -> Vec<ValidationIssue> {
        let rules = input.rules;
        let concepts = input.concepts();
        let mut issues = Vec::new();

        if rules.classes.is_empty() {
            if concepts.len() < rules.min_concepts_per_class {
                issues.push(ValidationIssue::new(
                    ErrorKind::Cardinality,
                    format!(
                        "ontology has {} concept(s), at least {} required",
                        concepts.len(),
                        rules.min_concepts_per_class
                    ),
                ));
            }
        } else {
            let by_id: BTreeMap<&str, &ConceptSpec> =
                concepts.iter().map(|c| (c.id.as_str(), c)).collect();
            let member_sets: Vec<(&ConceptSpec, BTreeSet<String>)> = concepts
                .iter()
                .map(|c| (c, memberships(c, &by_id)))
                .collect();

            for class in &rules.classes {
                let key = class_key(class);
                let members: Vec<&str> = member_sets
                    .iter()
                    .filter(|(_, classes)| classes.contains(&key))
                    .map(|(c, _)| c.id.as_str())
                    .collect();

                if members.len() < rules.min_concepts_per_class {
                    issues.push(
                        ValidationIssue::new(
                            ErrorKind::Cardinality,
                            format!(
                                "class '{}' has {} concept(s), at least {} required",
                                class,
                                members.len(),
                                rules.min_concepts_per_class
                            ),
                        )
                        .with_concepts(members),
                    );
                }
            }
        }

        for concept in concepts {
            if concept.positives.len() < rules.min_positives {
                issues.push(
                    ValidationIssue::new(
                        ErrorKind::Cardinality,
                        format!(
                            "concept '{}' lists {} positive cue(s), at least {} required",
                            concept.id,
                            concept.positives.len(),
                            rules.min_positives
                        ),
                    )
                    .with_concepts([concept.id.as_str()]),
                );
            }
            if concept.negatives.len() < rules.min_negatives {
                issues.push(
                    ValidationIssue::new(
                        ErrorKind::Cardinality,
                        format!(
                            "concept '{}' lists {} negative cue(s), at least {} required",
                            concept.id,
                            concept.negatives.len(),
                            rules.min_negatives
                        ),
                    )
                    .with_concepts([concept.id.as_str()]),
                );
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::test_support::run_on;
    use crate::validator::ValidationRules;

    fn rules(classes: &[&str], min: usize) -> ValidationRules {
        ValidationRules {
            classes: classes.iter().map(|c| c.to_string()).collect(),
            min_concepts_per_class: min,
            ..ValidationRules::default()
        }
    }

    #[test]
    fn test_counts_by_is_a() {
        let concepts = vec![
            ConceptSpec::new("a", "A").with_is_a("Tumor"),
            ConceptSpec::new("b", "B").with_is_a("tumor"),
            ConceptSpec::new("c", "C").with_is_a("Stroma"),
        ];
        let issues = run_on(&CardinalityCheck, concepts, &rules(&["TUMOR", "stroma"], 2));
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("'stroma' has 1"));
        assert_eq!(issues[0].concept_ids, vec!["c".to_string()]);
    }

    #[test]
    fn test_counts_through_ancestors() {
        let concepts = vec![
            ConceptSpec::new("invasive_carcinoma", "Invasive carcinoma"),
            ConceptSpec::new("ductal", "Ductal").with_parent("invasive_carcinoma"),
            ConceptSpec::new("lobular", "Lobular").with_parent("invasive_carcinoma"),
            ConceptSpec::new("signet", "Signet ring").with_parent("lobular"),
        ];
        let issues = run_on(&CardinalityCheck, concepts, &rules(&["Invasive Carcinoma"], 3));
        assert!(issues.is_empty(), "{:?}", issues);
    }

    #[test]
    fn test_no_classes_applies_to_total() {
        let issues = run_on(&CardinalityCheck, vec![ConceptSpec::new("a", "A")], &rules(&[], 2));
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("1 concept(s), at least 2"));
    }

    #[test]
    fn test_cue_minimums() {
        let mut concept = ConceptSpec::new("a", "A");
        concept.positives = vec!["nuclear atypia".into()];
        let rules = ValidationRules {
            min_positives: 3,
            min_negatives: 3,
            min_concepts_per_class: 1,
            ..ValidationRules::default()
        };
        let issues = run_on(&CardinalityCheck, vec![concept], &rules);
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn test_cyclic_parents_do_not_hang() {
        let concepts = vec![
            ConceptSpec::new("a", "A").with_parent("b"),
            ConceptSpec::new("b", "B").with_parent("a"),
        ];
        let issues = run_on(&CardinalityCheck, concepts, &rules(&["a"], 1));
        assert!(issues.is_empty());
    }
}
