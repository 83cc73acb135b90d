//! Field-level diff between two candidates.
//!
//! Used to record which parts of the ontology a repair attempt touched.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value as JsonValue;

use crate::concept::ConceptSpec;

fn fields(concept: &ConceptSpec) -> BTreeMap<String, JsonValue> {
    match serde_json::to_value(concept) {
        Ok(JsonValue::Object(map)) => map.into_iter().collect(),
        _ => BTreeMap::new(),
    }
}

/// Fields that differ between `previous` and `current`.
///
/// Entries are `<id>.<field>` for changed fields and a bare `<id>` for
/// concepts present on only one side. Concepts are matched by id; when an id
/// is duplicated, the first occurrence wins.
pub fn changed_fields(previous: &[ConceptSpec], current: &[ConceptSpec]) -> BTreeSet<String> {
    let mut before: BTreeMap<&str, &ConceptSpec> = BTreeMap::new();
    for concept in previous {
        before.entry(concept.id.as_str()).or_insert(concept);
    }
    let mut after: BTreeMap<&str, &ConceptSpec> = BTreeMap::new();
    for concept in current {
        after.entry(concept.id.as_str()).or_insert(concept);
    }

    let mut changed = BTreeSet::new();

    for (id, old) in &before {
        let Some(new) = after.get(id) else {
            changed.insert(id.to_string());
            continue;
        };
        let old_fields = fields(old);
        let new_fields = fields(new);
        let names: BTreeSet<&String> = old_fields.keys().chain(new_fields.keys()).collect();
        for name in names {
            if old_fields.get(name) != new_fields.get(name) {
                changed.insert(format!("{}.{}", id, name));
            }
        }
    }

    for id in after.keys() {
        if !before.contains_key(id) {
            changed.insert(id.to_string());
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changed_field_is_listed() {
        let before = vec![ConceptSpec::new("a", "A").with_parent("b"), ConceptSpec::new("b", "B")];
        let after = vec![ConceptSpec::new("a", "A"), ConceptSpec::new("b", "B")];
        let changed = changed_fields(&before, &after);
        assert_eq!(changed.into_iter().collect::<Vec<_>>(), vec!["a.parents".to_string()]);
    }

    #[test]
    fn test_added_and_dropped_concepts() {
        let before = vec![ConceptSpec::new("a", "A")];
        let after = vec![ConceptSpec::new("b", "B")];
        let changed = changed_fields(&before, &after);
        assert!(changed.contains("a"));
        assert!(changed.contains("b"));
        assert_eq!(changed.len(), 2);
    }

    #[test]
    fn test_optional_field_appearing_counts() {
        let before = vec![ConceptSpec::new("a", "A")];
        let mut cue = ConceptSpec::new("a", "A");
        cue.positives.push("mitoses".to_string());
        let changed = changed_fields(&before, &[cue]);
        assert!(changed.contains("a.positives"));
    }

    #[test]
    fn test_identical_is_empty() {
        let concepts = vec![ConceptSpec::new("a", "A").with_synonym("x")];
        assert!(changed_fields(&concepts, &concepts).is_empty());
    }
}
