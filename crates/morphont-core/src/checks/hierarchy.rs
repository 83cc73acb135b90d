//! Hierarchy check: `parents` must form a DAG.

use std::collections::{BTreeMap, BTreeSet};

use super::{Check, CheckInput};
use crate::concept::ConceptSpec;
use crate::report::{ErrorKind, ValidationIssue};

pub struct HierarchyCheck;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

struct CycleSearch<'a> {
    graph: BTreeMap<&'a str, BTreeSet<&'a str>>,
    colour: BTreeMap<&'a str, Colour>,
    path: Vec<&'a str>,
    seen: BTreeSet<Vec<&'a str>>,
    cycles: Vec<Vec<String>>,
}

impl<'a> CycleSearch<'a> {
    /// Depth-first from `root` on an explicit stack. Each frame holds a node
    /// and the parents it has yet to follow.
    fn visit(&mut self, root: &'a str) {
        let mut frames: Vec<(&'a str, Vec<&'a str>)> = Vec::new();
        self.enter(root, &mut frames);

        while let Some((_, pending)) = frames.last_mut() {
            match pending.pop() {
                Some(next) => match self.colour.get(next).copied() {
                    // Unknown ids are the reference check's business.
                    None => {}
                    Some(Colour::White) => self.enter(next, &mut frames),
                    Some(Colour::Grey) => self.record(next),
                    Some(Colour::Black) => {}
                },
                None => {
                    if let Some((node, _)) = frames.pop() {
                        self.path.pop();
                        self.colour.insert(node, Colour::Black);
                    }
                }
            }
        }
    }

    fn enter(&mut self, node: &'a str, frames: &mut Vec<(&'a str, Vec<&'a str>)>) {
        self.colour.insert(node, Colour::Grey);
        self.path.push(node);

        // Reversed so parents are followed in ascending order.
        let pending: Vec<&'a str> = self
            .graph
            .get(node)
            .map(|parents| parents.iter().rev().copied().collect())
            .unwrap_or_default();
        frames.push((node, pending));
    }

    fn record(&mut self, back_to: &'a str) {
        let Some(start) = self.path.iter().position(|&n| n == back_to) else {
            return;
        };
        let members = &self.path[start..];

        // Same cycle reached from another entry point rotates the members.
        let min_at = members
            .iter()
            .enumerate()
            .min_by_key(|(_, id)| **id)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let mut canonical = members[min_at..].to_vec();
        canonical.extend_from_slice(&members[..min_at]);
        if !self.seen.insert(canonical) {
            return;
        }

        let mut cycle: Vec<String> = members.iter().map(|s| s.to_string()).collect();
        cycle.push(back_to.to_string());
        self.cycles.push(cycle);
    }
}

/// Every cycle in the `parents` graph, each as the full path from its entry
/// node back to itself (`["a", "b", "a"]`).
///
/// Each cycle is reported once regardless of how many concepts lead into it.
pub fn find_cycles(concepts: &[ConceptSpec]) -> Vec<Vec<String>> {
    let mut graph: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for concept in concepts {
        graph
            .entry(concept.id.as_str())
            .or_default()
            .extend(concept.parents.iter().map(String::as_str));
    }

    let colour = graph.keys().map(|&id| (id, Colour::White)).collect();
    let roots: Vec<&str> = graph.keys().copied().collect();
    let mut search = CycleSearch {
        graph,
        colour,
        path: Vec::new(),
        seen: BTreeSet::new(),
        cycles: Vec::new(),
    };

    for root in roots {
        if search.colour.get(root) == Some(&Colour::White) {
            search.visit(root);
        }
    }

    search.cycles
}

impl Check for HierarchyCheck {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Cycle
    }

    fn run(&self, input: &CheckInput<'_>) -> Vec<ValidationIssue> {
        find_cycles(input.concepts())
            .into_iter()
            .map(|cycle| {
                let mut ids: Vec<String> = cycle.clone();
                ids.pop();
                ValidationIssue::new(
                    ErrorKind::Cycle,
                    format!("parents form a cycle: {}", cycle.join(" -> ")),
                )
                .with_concepts(ids)
            })
            .collect()
    }
}
