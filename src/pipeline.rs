//! End-to-end run of one job: upload inputs, submit, track, download outputs.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};

use crate::config::{JobDefinition, PipelineConfig};
use crate::error::PipelineError;
use crate::outputs::{OutputCollector, OutputResult};
use crate::poller::{Clock, JobProgressPoller, ProgressObserver, TokioClock};
use crate::reality::{DataTransfer, JobService, JobSettings};
use crate::references::ReferenceTable;
use crate::state_machine::{InputRecord, RunRecord, TerminalOutcome};
use crate::upload::{InputResource, UploadCoordinator, UploadOutcome};

/// Drives a job definition through the remote services.
///
/// Each step is also usable on its own, so a job submitted earlier can be
/// tracked or downloaded later.
pub struct Pipeline<S, C = TokioClock> {
    service: S,
    poller: JobProgressPoller<C>,
    project_id: String,
    references_file: PathBuf,
}

impl<S> Pipeline<S, TokioClock> {
    pub fn new(service: S, config: &PipelineConfig) -> Self {
        let poller = JobProgressPoller::new(config.poll_interval())
            .max_duration(config.max_poll_duration());
        Self {
            service,
            poller,
            project_id: config.project_id.clone(),
            references_file: config.references_file.clone(),
        }
    }
}

impl<S, C> Pipeline<S, C> {
    /// Replace the poller, e.g. to inject a different clock.
    pub fn with_poller<C2>(self, poller: JobProgressPoller<C2>) -> Pipeline<S, C2> {
        Pipeline {
            service: self.service,
            poller,
            project_id: self.project_id,
            references_file: self.references_file,
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn references_file(&self) -> &Path {
        &self.references_file
    }
}

impl<S, C> Pipeline<S, C>
where
    S: DataTransfer + JobService,
    C: Clock,
{
    /// Make sure every input has a cloud id, uploading what is missing.
    ///
    /// The reference table is saved after each new upload so that a failure
    /// later in the list does not lose the ids already obtained.
    pub async fn upload_inputs(
        &self,
        inputs: &[InputResource],
    ) -> Result<Vec<InputRecord>, PipelineError> {
        let mut table = ReferenceTable::load_or_default(&self.references_file)?;
        let coordinator = UploadCoordinator::new(&self.service, self.project_id.as_str());
        let mut records = Vec::with_capacity(inputs.len());

        for input in inputs {
            let outcome = coordinator.ensure_uploaded(input, &mut table).await?;
            if let UploadOutcome::Uploaded(_) = outcome {
                table.save(&self.references_file)?;
            }
            records.push(InputRecord {
                name: input.name.clone(),
                local_path: ReferenceTable::canonical_key(&input.path),
                cloud_id: outcome.cloud_id().to_string(),
                reused: outcome.is_reused(),
            });
        }

        Ok(records)
    }

    /// Create the workspace and job, then submit it. Returns the job id.
    pub async fn submit(
        &self,
        definition: &JobDefinition,
        inputs: &[InputRecord],
    ) -> Result<String, PipelineError> {
        let workspace_id = self
            .service
            .create_workspace(definition.workspace_name(), &self.project_id)
            .await
            .map_err(PipelineError::api("create workspace"))?;

        let settings = JobSettings {
            job_type: definition.job_type.clone(),
            quality: definition.quality.clone(),
            inputs: inputs.iter().map(|i| i.cloud_id.clone()).collect(),
            outputs: definition.outputs.clone(),
        };
        let job_id = self
            .service
            .create_job(&settings, &definition.job_name, &workspace_id)
            .await
            .map_err(PipelineError::api("create job"))?;

        self.service
            .submit_job(&job_id)
            .await
            .map_err(PipelineError::api("submit job"))?;

        info!(%job_id, %workspace_id, job_name = %definition.job_name, "job submitted");
        Ok(job_id)
    }

    pub async fn track_job<O>(
        &self,
        job_id: &str,
        observer: &mut O,
    ) -> Result<TerminalOutcome, PipelineError>
    where
        O: ProgressObserver + ?Sized,
    {
        Ok(self.poller.track(job_id, &self.service, observer).await?)
    }

    /// Fetch the job's declared outputs into `dest_dir`.
    ///
    /// Paths inside downloaded orientation and scene outputs are restored
    /// from the reference table.
    pub async fn download_outputs(
        &self,
        job_id: &str,
        dest_dir: &Path,
    ) -> Result<Vec<OutputResult>, PipelineError> {
        let properties = self
            .service
            .job_properties(job_id)
            .await
            .map_err(PipelineError::api("read job properties"))?;

        if properties.outputs.present().next().is_none() {
            warn!(job_id, "job declares no downloadable outputs");
        }

        // Orientation and scene outputs point back at local inputs through it.
        let table = ReferenceTable::load_or_default(&self.references_file)?;
        let collector = OutputCollector::new(&self.service, self.project_id.as_str())
            .with_references(&table);
        Ok(collector.collect(job_id, &properties.outputs, dest_dir).await)
    }

    /// Run every step for `definition` and summarise the run.
    ///
    /// A cancelled job is a successful run with no downloads; failed output
    /// downloads are reported in the record rather than as an error.
    pub async fn run<O>(
        &self,
        definition: &JobDefinition,
        observer: &mut O,
    ) -> Result<RunRecord, PipelineError>
    where
        O: ProgressObserver + ?Sized,
    {
        let started_at = Utc::now();

        let inputs = self.upload_inputs(&definition.inputs).await?;
        let job_id = self.submit(definition, &inputs).await?;
        let outcome = self.track_job(&job_id, observer).await?;

        let outputs = if outcome.is_cancelled() {
            info!(%job_id, "job cancelled, skipping downloads");
            Vec::new()
        } else {
            self.download_outputs(&job_id, &definition.output_dir)
                .await?
        };

        Ok(RunRecord::finish(
            job_id,
            definition.job_name.clone(),
            inputs,
            &outcome,
            &outputs,
            started_at,
        ))
    }
}
