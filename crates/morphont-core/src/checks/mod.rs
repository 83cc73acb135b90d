//! Validation checks.
//!
//! Each check looks at a candidate from one angle and returns the issues it
//! found. Checks are independent: none of them relies on another having
//! passed, so a validator can always run all of them.

mod cardinality;
mod hierarchy;
mod references;
mod relations;
mod structure;
mod synonyms;

pub use cardinality::CardinalityCheck;
pub use hierarchy::{find_cycles, HierarchyCheck};
pub use references::ReferenceCheck;
pub use relations::RelationCheck;
pub use structure::StructureCheck;
pub use synonyms::SynonymCheck;

use crate::concept::{ConceptSpec, ParsedCandidate};
use crate::report::{ErrorKind, ValidationIssue};
use crate::validator::ValidationRules;

/// Everything a check may look at.
pub struct CheckInput<'a> {
    pub parsed: &'a ParsedCandidate,
    pub rules: &'a ValidationRules,
}

impl<'a> CheckInput<'a> {
    /// Concepts that decoded cleanly.
    pub fn concepts(&self) -> &'a [ConceptSpec] {
        &self.parsed.concepts
    }
}

/// A single validation check.
pub trait Check: Send + Sync {
    /// The kind of issue this check reports.
    fn kind(&self) -> ErrorKind;

    /// Run the check.
    fn run(&self, input: &CheckInput<'_>) -> Vec<ValidationIssue>;
}

/// The standard checks, in reporting order.
pub fn default_checks() -> Vec<Box<dyn Check>> {
    vec![
        Box::new(StructureCheck),
        Box::new(CardinalityCheck),
        Box::new(SynonymCheck),
        Box::new(HierarchyCheck),
        Box::new(ReferenceCheck),
        Box::new(RelationCheck),
    ]
}
