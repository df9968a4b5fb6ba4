//! Per-source and per-run results reported by the batch runner.

use std::path::PathBuf;

use serde::Serialize;

use execfetch::{FetchOutcome, MergeSummary};

/// What happened to a single source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SourceOutcome {
    Saved { path: PathBuf, bytes: u64 },
    /// The source had no execution data.
    Empty,
    /// The source failed and the run carried on.
    Failed { error: String },
}

impl From<FetchOutcome> for SourceOutcome {
    fn from(outcome: FetchOutcome) -> Self {
        match outcome {
            FetchOutcome::Saved { path, bytes } => SourceOutcome::Saved { path, bytes },
            FetchOutcome::Empty => SourceOutcome::Empty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    /// 1-based position in the configured source list.
    pub index: usize,
    pub label: String,
    pub output: PathBuf,
    pub outcome: SourceOutcome,
}

/// Summary of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub sources: Vec<SourceReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged: Option<MergeSummary>,
    /// Run-level failures swallowed because fail-on-error was off.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl BatchReport {
    pub fn saved(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources
            .iter()
            .filter(|s| matches!(s.outcome, SourceOutcome::Saved { .. }))
    }

    pub fn failed(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources
            .iter()
            .filter(|s| matches!(s.outcome, SourceOutcome::Failed { .. }))
    }
}
