//! Per-run transition log.

use chrono::{DateTime, Utc};
use morphont_core::ValidationReport;
use serde::{Deserialize, Serialize};

use super::Stage;

/// One completed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub stage: Stage,

    /// Synthesis attempts made when the stage completed
    pub iteration: u32,

    pub at: DateTime<Utc>,
    pub detail: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ValidationReport>,
}

/// Ordered record of everything a run did. Never persisted by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunTrace {
    events: Vec<TraceEvent>,
}

impl RunTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: Stage, iteration: u32, detail: impl Into<String>) {
        self.events.push(TraceEvent {
            stage,
            iteration,
            at: Utc::now(),
            detail: detail.into(),
            report: None,
        });
    }

    pub fn record_validation(&mut self, iteration: u32, report: &ValidationReport) {
        let detail = if report.valid {
            "valid".to_string()
        } else {
            format!("{} error(s)", report.error_count())
        };
        self.events.push(TraceEvent {
            stage: Stage::Validation,
            iteration,
            at: Utc::now(),
            detail,
            report: Some(report.clone()),
        });
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Stages in the order they completed.
    pub fn stages(&self) -> Vec<Stage> {
        self.events.iter().map(|e| e.stage).collect()
    }

    pub fn last(&self) -> Option<&TraceEvent> {
        self.events.last()
    }

    /// Every validation report, oldest first.
    pub fn reports(&self) -> impl Iterator<Item = &ValidationReport> {
        self.events.iter().filter_map(|e| e.report.as_ref())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
