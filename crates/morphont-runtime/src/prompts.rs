//! Prompt text for synthesis and repair calls.
//!
//! The system prompt is the rendered template and stays identical across
//! every attempt of a run; only the user message changes between synthesis
//! and repair.

use std::path::Path;

use morphont_core::{CandidateDocument, ValidationReport};

use crate::config::ConfigError;
use crate::evidence::RawDocument;

/// Built-in ontology template.
pub const DEFAULT_TEMPLATE: &str = r#"You are a pathology ontology curator for the {{DATASET_NAME}} dataset.

The dataset has {{NUM_CLASSES}} target classes:
{{CLASS_DESCRIPTIONS}}

Build a JSON object describing the morphology concepts a pathologist uses to
tell these classes apart:

{
  "concepts": [
    {
      "id": "snake_case_identifier",
      "name": "Human readable name",
      "definition": "One or two sentences grounded in the evidence",
      "synonyms": ["alternative term"],
      "is_a": "target class this concept belongs to, or null",
      "parents": ["id of a more general concept"],
      "exclusive_with": ["id of a concept that cannot appear together with this one"],
      "co_occurs_with": ["id of a concept typically seen together with this one"],
      "examples": ["short description of a typical finding"],
      "positives": ["hallmark finding"],
      "negatives": ["common confounder"],
      "magnifications": ["10x", "40x"]
    }
  ],
  "metadata": {"version": "1", "dataset": "{{DATASET_NAME}}", "notes": ""}
}

Rules:
- Every id is unique and stable; every parents, exclusive_with and co_occurs_with entry names an existing id.
- Parents never form a cycle.
- A pair of concepts is never both exclusive and co-occurring.
- Synonyms within one concept are distinct ignoring case and spacing.
- Cover every target class with at least one concept whose is_a names it.
- Magnifications are chosen from 5x, 10x, 20x, 40x.

Return only JSON."#;

/// What the template is rendered against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetContext {
    pub dataset: String,

    /// Target classes, in the order they were requested
    pub classes: Vec<String>,

    /// Free-text class descriptions; a bullet list of `classes` when unset
    pub class_descriptions: Option<String>,
}

impl DatasetContext {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            ..Self::default()
        }
    }

    pub fn with_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.classes = classes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_descriptions(mut self, descriptions: impl Into<String>) -> Self {
        self.class_descriptions = Some(descriptions.into());
        self
    }

    fn descriptions(&self) -> String {
        match &self.class_descriptions {
            Some(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ => self
                .classes
                .iter()
                .map(|class| format!("- {}", class))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A system prompt template with `{{DATASET_NAME}}`, `{{NUM_CLASSES}}` and
/// `{{CLASS_DESCRIPTIONS}}` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    text: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(text))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn render(&self, context: &DatasetContext) -> String {
        self.text
            .replace("{{DATASET_NAME}}", &context.dataset)
            .replace("{{NUM_CLASSES}}", &context.classes.len().to_string())
            .replace("{{CLASS_DESCRIPTIONS}}", &context.descriptions())
    }
}

/// Numbered evidence blocks, at most `max_documents` of them.
pub fn evidence_block(documents: &[RawDocument], max_documents: usize) -> String {
    documents
        .iter()
        .take(max_documents)
        .enumerate()
        .map(|(i, doc)| {
            format!(
                "[{}] {}\nURL: {}\nSummary: {}",
                i + 1,
                doc.title,
                doc.url,
                doc.snippet
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn evidence_section(documents: &[RawDocument], max_documents: usize) -> String {
    if documents.is_empty() {
        "(no literature evidence was found; rely on established pathology knowledge)".to_string()
    } else {
        evidence_block(documents, max_documents)
    }
}

/// User message for a first synthesis attempt.
pub fn synthesis_prompt(queries: &[String], documents: &[RawDocument], max_documents: usize) -> String {
    let queries = queries
        .iter()
        .map(|q| format!("- {}", q))
        .collect::<Vec<_>>()
        .join("\n");

    let evidence = evidence_section(documents, max_documents);

    format!(
        "Use the following literature evidence to construct the JSON.\n\
         Queries used:\n{}\n\n\
         Evidence:\n{}\n\n\
         Return only JSON.",
        queries, evidence
    )
}

/// User message for a repair attempt. The errors are quoted verbatim and
/// the previous concept ids are listed so the model keeps them stable. The
/// same evidence as the first attempt is repeated.
pub fn repair_prompt(
    previous: &CandidateDocument,
    report: &ValidationReport,
    documents: &[RawDocument],
    max_documents: usize,
) -> String {
    let ids = previous
        .parse()
        .concepts
        .iter()
        .map(|c| c.id.clone())
        .collect::<Vec<_>>();

    let preserve = if ids.is_empty() {
        String::new()
    } else {
        format!(
            "Keep these concept ids unchanged unless an error names them: {}\n",
            ids.join(", ")
        )
    };

    format!(
        "The previous JSON was invalid. Fix it to match the exact schema and guidance.\n\
         Error: {}\n\
         {}\
         Previous JSON:\n{}\n\n\
         Evidence:\n{}\n\n\
         Return JSON only.",
        report.summary(),
        preserve,
        previous.json_text(),
        evidence_section(documents, max_documents)
    )
}
