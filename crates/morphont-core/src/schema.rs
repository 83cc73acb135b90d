//! JSON Schema validation for ontology documents.
//!
//! The schema ships inside the crate (`schema/ontology.schema.json`) and is
//! compiled once on first use.

use std::sync::OnceLock;
use thiserror::Error;

/// Embedded ontology schema (loaded at compile time).
const ONTOLOGY_SCHEMA_JSON: &str = include_str!("../schema/ontology.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema loading.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = serde_json::from_str(ONTOLOGY_SCHEMA_JSON)
            .map_err(|e| format!("Invalid schema JSON: {}", e))?;

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    result
        .as_ref()
        .map_err(|e| SchemaError::LoadError(e.clone()))
}

/// A schema violation with the JSON pointer of the offending instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub instance_path: String,
    pub message: String,
}

/// Validate a document value against the ontology schema.
///
/// Returns every violation; an empty list means the value conforms.
pub fn schema_violations(document: &serde_json::Value) -> Result<Vec<SchemaViolation>, SchemaError> {
    let validator = get_validator()?;

    Ok(validator
        .iter_errors(document)
        .map(|e| SchemaViolation {
            instance_path: e.instance_path.to_string(),
            message: format!("{} at {}", e, e.instance_path),
        })
        .collect())
}

/// The raw schema text, for embedding in prompts.
pub fn schema_text() -> &'static str {
    ONTOLOGY_SCHEMA_JSON
}
