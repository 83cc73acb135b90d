//! # morphont-core
//!
//! Deterministic ontology model and validation engine.
//!
//! This crate owns everything about an ontology that can be decided without
//! I/O:
//! - What a concept looks like ([`ConceptSpec`]) and how a finished ontology
//!   is laid out ([`OntologyDocument`])
//! - How raw model output is read ([`CandidateDocument`])
//! - Whether a candidate is acceptable ([`Validator`], [`ValidationReport`])
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: the same candidate always yields the same report
//! 2. **No LLM calls**: validation never leaves the process
//! 3. **Exhaustive**: every check runs, failures never short-circuit
//!
//! ## Example
//!
//! ```rust,ignore
//! use morphont_core::{CandidateDocument, ValidationRules, Validator};
//!
//! let validator = Validator::new(ValidationRules::default());
//! let report = validator.validate(&CandidateDocument::new(raw_model_output));
//! if !report.valid {
//!     for issue in &report.errors {
//!         eprintln!("[{}] {}", issue.kind, issue.message);
//!     }
//! }
//! ```

pub mod checks;
pub mod concept;
pub mod repair;
pub mod report;
pub mod schema;
pub mod validator;

pub use concept::{
    normalize_term, CandidateDocument, ConceptSpec, DocumentMetadata, OntologyDocument,
    ParsedCandidate,
};
pub use report::{ErrorKind, ValidationIssue, ValidationReport};
pub use schema::SchemaError;
pub use validator::{ValidationRules, Validator};

/// Validate a candidate with default rules.
///
/// Shorthand for `Validator::new(ValidationRules::default()).validate(candidate)`.
pub fn validate(candidate: &CandidateDocument) -> ValidationReport {
    Validator::new(ValidationRules::default()).validate(candidate)
}
