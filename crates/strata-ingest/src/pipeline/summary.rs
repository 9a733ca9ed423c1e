//! Serialisable outcome of pipeline runs

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::facts::FactReport;
use crate::reconcile::ReconcileReport;
use crate::run::RunId;
use crate::sources::SourceError;
use crate::staging::StagingReport;

/// What the load step did
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadOutcome {
    Merge(ReconcileReport),
    Append(FactReport),
}

impl LoadOutcome {
    pub fn failed_rows(&self) -> usize {
        match self {
            LoadOutcome::Merge(report) => report.failed,
            LoadOutcome::Append(report) => report.failed,
        }
    }
}

/// Outcome of one entity pipeline
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub entity: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub fetched: usize,
    /// Source items answered without usable data
    pub skipped: usize,
    pub source_errors: Vec<SourceError>,
    /// One report per staging table written
    pub staging: Vec<StagingReport>,
    pub load: LoadOutcome,
    /// The fetch returned no records
    pub no_data: bool,
    /// Basic country rows without geo or culture partner
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unmatched: Option<usize>,
}

/// A pipeline of a batch that failed as a whole
#[derive(Debug, Clone, Serialize)]
pub struct PipelineFailure {
    pub pipeline: String,
    pub error: String,
}

/// A pipeline of a batch that was not started
#[derive(Debug, Clone, Serialize)]
pub struct SkippedPipeline {
    pub pipeline: String,
    pub reason: String,
}

/// Outcome of several pipelines run under one run id
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub run_id: RunId,
    pub summaries: Vec<RunSummary>,
    pub failures: Vec<PipelineFailure>,
    pub skipped: Vec<SkippedPipeline>,
}

impl BatchSummary {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            summaries: Vec::new(),
            failures: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Every pipeline ran and none failed
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }

    pub(crate) fn skip(&mut self, pipeline: &str, reason: impl Into<String>) {
        self.skipped.push(SkippedPipeline {
            pipeline: pipeline.to_string(),
            reason: reason.into(),
        });
    }

    pub(crate) fn record(&mut self, pipeline: &str, outcome: crate::error::Result<RunSummary>) {
        match outcome {
            Ok(summary) => self.summaries.push(summary),
            Err(e) => self.failures.push(PipelineFailure {
                pipeline: pipeline.to_string(),
                error: e.to_string(),
            }),
        }
    }
}

/// Row count of one table
#[derive(Debug, Clone, Serialize)]
pub struct TableStatus {
    pub entity: String,
    pub table: String,
    pub rows: i64,
}
