use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::JobState;
use crate::outputs::OutputResult;

/// Immutable snapshot returned by a single status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub state: JobState,
    /// Completion percentage, 0 to 100.
    pub percent: u8,
    /// Name of the processing step currently running.
    pub step: String,
}

impl JobProgress {
    /// Builds a snapshot, clamping `percent` to 100.
    pub fn new(state: JobState, percent: u8, step: impl Into<String>) -> Self {
        Self {
            state,
            percent: percent.min(100),
            step: step.into(),
        }
    }
}

/// Non-error end of a tracked job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalOutcome {
    Succeeded(JobProgress),
    /// Planned termination, distinct from a failure.
    Cancelled(JobProgress),
}

impl TerminalOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TerminalOutcome::Cancelled(_))
    }

    pub fn progress(&self) -> &JobProgress {
        match self {
            TerminalOutcome::Succeeded(p) | TerminalOutcome::Cancelled(p) => p,
        }
    }
}

/// Final status of a whole pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Completed,
    /// The job succeeded but at least one output could not be downloaded.
    CompletedWithErrors,
    Cancelled,
}

/// One input of a run and the cloud id it resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRecord {
    pub name: String,
    pub local_path: String,
    pub cloud_id: String,
    /// True when the id came from the reference table instead of a new upload.
    pub reused: bool,
}

/// One declared output of a run and where it ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub kind: String,
    pub output_id: String,
    pub path: Option<PathBuf>,
    pub error: Option<String>,
}

impl From<&OutputResult> for OutputRecord {
    fn from(result: &OutputResult) -> Self {
        match result {
            Ok(done) => Self {
                kind: done.kind.clone(),
                output_id: done.output_id.clone(),
                path: Some(done.path.clone()),
                error: None,
            },
            Err(err) => Self {
                kind: err.kind.clone(),
                output_id: err.output_id.clone(),
                path: None,
                error: Some(err.source.to_string()),
            },
        }
    }
}

/// Structured summary produced at the end of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub job_id: String,
    pub job_name: String,
    pub status: RunStatus,
    pub final_progress: JobProgress,
    pub inputs: Vec<InputRecord>,
    pub outputs: Vec<OutputRecord>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl RunRecord {
    /// Close a run that started at `started_at`.
    pub fn finish(
        job_id: String,
        job_name: String,
        inputs: Vec<InputRecord>,
        outcome: &TerminalOutcome,
        outputs: &[OutputResult],
        started_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        let status = if outcome.is_cancelled() {
            RunStatus::Cancelled
        } else if outputs.iter().any(Result::is_err) {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Completed
        };

        Self {
            run_id: Uuid::new_v4(),
            job_id,
            job_name,
            status,
            final_progress: outcome.progress().clone(),
            inputs,
            outputs: outputs.iter().map(OutputRecord::from).collect(),
            started_at,
            completed_at: now,
            duration_ms: (now - started_at).num_milliseconds(),
        }
    }
}
