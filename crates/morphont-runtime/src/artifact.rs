//! Writing finalized ontologies to disk.

use chrono::{DateTime, Utc};
use morphont_core::OntologyDocument;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize ontology: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Paths written by [`write_artifact`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenArtifact {
    pub path: PathBuf,
    pub snapshot: Option<PathBuf>,
}

/// File name for a dataset's ontology; path separators and spaces become
/// underscores.
pub fn artifact_name(dataset: &str) -> String {
    let stem: String = dataset
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    let stem = stem.trim_matches('.');
    format!("{}.json", if stem.is_empty() { "ontology" } else { stem })
}

/// File name for a timestamped snapshot.
pub fn snapshot_name(at: DateTime<Utc>) -> String {
    format!("ontology_{}.json", at.format("%Y%m%dT%H%M%SZ"))
}

fn write_json(path: &Path, text: &str) -> Result<(), ArtifactError> {
    let io = |source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io)?;
    }
    std::fs::write(path, text).map_err(io)
}

/// Write `document` as pretty JSON to `<dir>/<dataset>.json`, and a
/// timestamped copy into `versions_dir` when one is given.
pub fn write_artifact(
    dir: &Path,
    versions_dir: Option<&Path>,
    document: &OntologyDocument,
) -> Result<WrittenArtifact, ArtifactError> {
    let text = document.to_json_pretty()?;

    let path = dir.join(artifact_name(&document.metadata.dataset));
    write_json(&path, &text)?;

    let snapshot = match versions_dir {
        Some(versions) => {
            let snapshot = versions.join(snapshot_name(Utc::now()));
            write_json(&snapshot, &text)?;
            Some(snapshot)
        }
        None => None,
    };

    tracing::info!(path = %path.display(), concepts = document.concepts.len(), "ontology written");
    Ok(WrittenArtifact { path, snapshot })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use morphont_core::{ConceptSpec, DocumentMetadata};

    fn document() -> OntologyDocument {
        OntologyDocument {
            concepts: vec![ConceptSpec::new("dcis", "DCIS").with_definition("Ductal carcinoma in situ")],
            metadata: DocumentMetadata {
                version: "1".to_string(),
                dataset: "BRACS".to_string(),
                notes: String::new(),
            },
        }
    }

    #[test]
    fn test_artifact_name() {
        assert_eq!(artifact_name("BRACS"), "BRACS.json");
        assert_eq!(artifact_name("tcga/brca v2"), "tcga_brca_v2.json");
        assert_eq!(artifact_name("  "), "ontology.json");
    }

    #[test]
    fn test_snapshot_name() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(snapshot_name(at), "ontology_20240309T140507Z.json");
    }

    #[test]
    fn test_write_artifact_with_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("outputs");
        let versions = dir.path().join("versions");

        let written = write_artifact(&out, Some(&versions), &document()).unwrap();
        assert_eq!(written.path, out.join("BRACS.json"));

        let text = std::fs::read_to_string(&written.path).unwrap();
        let back: OntologyDocument = serde_json::from_str(&text).unwrap();
        assert_eq!(back, document());

        let snapshot = written.snapshot.unwrap();
        assert!(snapshot.starts_with(&versions));
        assert_eq!(std::fs::read_to_string(snapshot).unwrap(), text);
    }
}
