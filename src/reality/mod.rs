//! Remote collaborators: the data store that holds uploaded inputs and
//! produced outputs, and the processing service that runs jobs.
//!
//! The rest of the crate only depends on the traits below; [`RealityClient`]
//! is the HTTP implementation used by the binary.

pub mod client;
pub mod error;
pub mod progress;
pub mod types;

use std::path::Path;

pub use client::RealityClient;
pub use error::{ApiError, QueryError};
pub use progress::ProgressHook;
pub use types::{JobProperties, JobSettings, TransferSummary};

use crate::state_machine::JobProgress;

/// Moves data between the local filesystem and the cloud store.
#[allow(async_fn_in_trait)]
pub trait DataTransfer {
    /// Uploads the file or directory at `path` and returns its new cloud id.
    async fn upload(
        &self,
        path: &Path,
        name: &str,
        data_type: &str,
        project_id: &str,
    ) -> Result<String, ApiError>;

    /// Downloads every file of `cloud_id` into `dest_dir`.
    async fn download(
        &self,
        cloud_id: &str,
        dest_dir: &Path,
        project_id: &str,
    ) -> Result<TransferSummary, ApiError>;
}

/// Answers status queries for a submitted job.
#[allow(async_fn_in_trait)]
pub trait JobStatusSource {
    async fn job_progress(&self, job_id: &str) -> Result<JobProgress, QueryError>;
}

/// Creates, submits and inspects processing jobs.
#[allow(async_fn_in_trait)]
pub trait JobService: JobStatusSource {
    async fn create_workspace(&self, name: &str, project_id: &str) -> Result<String, ApiError>;

    async fn create_job(
        &self,
        settings: &JobSettings,
        name: &str,
        workspace_id: &str,
    ) -> Result<String, ApiError>;

    async fn submit_job(&self, job_id: &str) -> Result<(), ApiError>;

    async fn job_properties(&self, job_id: &str) -> Result<JobProperties, ApiError>;
}
