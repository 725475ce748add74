use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::reality::{ApiError, QueryError};
use crate::state_machine::{JobProgress, PollState};

/// Failures of the persisted local-path ↔ cloud-id table.
#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("reference file {path}: {source}", path = .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed reference record at {path}:{line}: {content:?}", path = .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        content: String,
    },

    #[error("local path {local_path} is already mapped to {existing}")]
    DuplicateLocalPath { local_path: String, existing: String },

    #[error("cloud id {cloud_id} is already mapped from {existing}")]
    DuplicateCloudId { cloud_id: String, existing: String },

    #[error("invalid {field} in reference record: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("no reference for {0}")]
    NotFound(String),
}

/// Failures while swapping local paths and cloud ids inside reference
/// documents (orientations, context scenes).
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("{path}: {source}", path = .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no {expected} in {dir}", dir = .dir.display())]
    MissingDocument { dir: PathBuf, expected: &'static str },

    #[error("invalid JSON in {path}: {source}", path = .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} is not inside any uploaded input")]
    UnknownLocalPath { path: String },

    #[error("cloud id {cloud_id} has no local path in the reference table")]
    UnknownCloudId { cloud_id: String },
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to upload {name} from {path}: {source}", path = .resource.display())]
    Transfer {
        resource: PathBuf,
        name: String,
        #[source]
        source: ApiError,
    },

    #[error("failed to prepare {name} from {path} for upload: {source}", path = .resource.display())]
    Rewrite {
        resource: PathBuf,
        name: String,
        #[source]
        source: RewriteError,
    },

    #[error(transparent)]
    Reference(#[from] ReferenceError),
}

/// A single declared output that could not be fetched.
#[derive(Debug, Error)]
#[error("failed to download {kind} output {output_id}: {source}")]
pub struct DownloadError {
    pub kind: String,
    pub output_id: String,
    #[source]
    pub source: OutputFailure,
}

#[derive(Debug, Error)]
pub enum OutputFailure {
    #[error(transparent)]
    Transfer(#[from] ApiError),

    /// Downloaded, but its references could not be turned back into local paths.
    #[error(transparent)]
    Rewrite(#[from] RewriteError),
}

/// Why tracking a remote job stopped without a usable outcome.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("status query for job {job_id} failed: {source}")]
    QueryFailed {
        job_id: String,
        #[source]
        source: QueryError,
    },

    #[error("job {job_id} failed at {percent}% (step: {step})")]
    JobFailed {
        job_id: String,
        percent: u8,
        step: String,
    },

    #[error("job {job_id} still running after {elapsed:?}")]
    TimedOut {
        job_id: String,
        elapsed: Duration,
        last: Option<JobProgress>,
    },

    #[error("job {job_id} already reached terminal state {state}")]
    AlreadyTerminal { job_id: String, state: PollState },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("{operation} failed: {source}")]
    Api {
        operation: &'static str,
        #[source]
        source: ApiError,
    },
}

impl PipelineError {
    pub(crate) fn api(operation: &'static str) -> impl FnOnce(ApiError) -> Self {
        move |source| Self::Api { operation, source }
    }
}
