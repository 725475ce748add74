//! Idempotent uploads of local inputs, checked against the reference table.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::UploadError;
use crate::reality::DataTransfer;
use crate::references::ReferenceTable;
use crate::rewrite::{self, ReferenceDocument};

/// A local file or directory that a job consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputResource {
    pub path: PathBuf,
    /// Display name of the cloud entry created for it.
    pub name: String,
    /// Data type understood by the store, e.g. `CCImageCollection`.
    ///
    /// `CCOrientations` and `ContextScene` inputs reference other inputs by
    /// path; those must come earlier in the list.
    pub data_type: String,
}

/// Where the cloud id of an input came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Already in the reference table; nothing was sent.
    Reused(String),
    /// Sent now and recorded in the table.
    Uploaded(String),
}

impl UploadOutcome {
    pub fn cloud_id(&self) -> &str {
        match self {
            UploadOutcome::Reused(id) | UploadOutcome::Uploaded(id) => id,
        }
    }

    pub fn is_reused(&self) -> bool {
        matches!(self, UploadOutcome::Reused(_))
    }
}

/// Uploads inputs that the reference table does not know yet.
///
/// The coordinator only mutates the table after a confirmed upload and never
/// saves it; persisting is left to the caller so several uploads can share
/// one write.
pub struct UploadCoordinator<'a, T> {
    transfer: &'a T,
    project_id: String,
}

impl<'a, T: DataTransfer> UploadCoordinator<'a, T> {
    pub fn new(transfer: &'a T, project_id: impl Into<String>) -> Self {
        Self {
            transfer,
            project_id: project_id.into(),
        }
    }

    pub async fn ensure_uploaded(
        &self,
        input: &InputResource,
        table: &mut ReferenceTable,
    ) -> Result<UploadOutcome, UploadError> {
        let key = ReferenceTable::canonical_key(&input.path);

        if table.has_local_path(&key) {
            let cloud_id = table.get_cloud_id_from_local_path(&key)?.to_string();
            debug!(path = %key, %cloud_id, "input already uploaded, reusing");
            return Ok(UploadOutcome::Reused(cloud_id));
        }

        // Documents are sent with their paths replaced by cloud references.
        let staged = ReferenceDocument::for_data_type(&input.data_type)
            .map(|document| rewrite::stage_for_upload(document, &input.path, &*table))
            .transpose()
            .map_err(|source| UploadError::Rewrite {
                resource: input.path.clone(),
                name: input.name.clone(),
                source,
            })?;
        let source = staged.as_ref().map_or(input.path.as_path(), |dir| dir.path());

        info!(path = %key, name = %input.name, "uploading input");
        let cloud_id = self
            .transfer
            .upload(source, &input.name, &input.data_type, &self.project_id)
            .await
            .map_err(|source| UploadError::Transfer {
                resource: input.path.clone(),
                name: input.name.clone(),
                source,
            })?;

        table.add_reference(&key, &cloud_id)?;
        Ok(UploadOutcome::Uploaded(cloud_id))
    }
}
