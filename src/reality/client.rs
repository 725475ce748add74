use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_LENGTH};
use reqwest::{Body, Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use super::error::ApiError;
use super::progress::{ProgressHook, TransferTracker};
use super::types::{
    AuthoringFlag, ContainerEnvelope, CreateJobRequest, CreateRealityDataRequest,
    CreateWorkspaceRequest, ErrorEnvelope, JobEnvelope, JobProperties, JobSettings,
    ProgressEnvelope, RealityDataBody, RealityDataEnvelope, SubmitJobRequest, TransferSummary,
    UpdateRealityDataRequest, WorkspaceEnvelope,
};
use super::{DataTransfer, JobService, JobStatusSource};
use crate::state_machine::JobProgress;
use crate::xml;

const SERVICE_URL: &str = "https://api.bentley.com";
const ACCEPT_VERSION: &str = "application/vnd.bentley.itwin-platform.v1+json";
const USER_AGENT: &str = concat!("reality-pipeline/", env!("CARGO_PKG_VERSION"));
const DEFAULT_CONCURRENCY: usize = 4;

/// HTTP client for the reality data store and the processing service.
///
/// Service calls carry the bearer token; blob transfers go straight to the
/// storage container through its SAS URL and carry no token.
#[derive(Debug, Clone)]
pub struct RealityClient {
    access_token: String,
    base_url: String,
    client: Client,
    blob_client: Client,
    concurrency: usize,
    progress: Option<ProgressHook>,
}

impl RealityClient {
    pub fn new(access_token: String) -> Result<Self, ApiError> {
        Self::with_base_url(access_token, SERVICE_URL.to_string())
    }

    /// Create a client pointing at a custom service URL (useful for testing).
    pub fn with_base_url(access_token: String, base_url: String) -> Result<Self, ApiError> {
        Self::with_timeout(access_token, base_url, Duration::from_secs(120))
    }

    /// `timeout` bounds service calls only; blob transfers are not bounded
    /// since a single file may take arbitrarily long.
    pub fn with_timeout(
        access_token: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        let blob_client = Client::builder()
            .connect_timeout(Duration::from_secs(60))
            .user_agent(USER_AGENT)
            .build()?;
        let access_token = access_token
            .strip_prefix("Bearer ")
            .map(str::to_string)
            .unwrap_or(access_token);

        Ok(Self {
            access_token,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            blob_client,
            concurrency: DEFAULT_CONCURRENCY,
            progress: None,
        })
    }

    /// Maximum number of files transferred at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Report the byte progress of every upload and download to `hook`.
    pub fn with_progress(mut self, hook: ProgressHook) -> Self {
        self.progress = Some(hook);
        self
    }

    fn tracker(&self, total: u64) -> Arc<TransferTracker> {
        Arc::new(TransferTracker::new(total, self.progress.clone()))
    }

    fn service(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.access_token)
            .header(ACCEPT, ACCEPT_VERSION)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = check_status(request.send().await?).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<(), ApiError> {
        check_status(request.send().await?).await?;
        Ok(())
    }

    async fn create_reality_data(
        &self,
        name: &str,
        data_type: &str,
        project_id: &str,
    ) -> Result<String, ApiError> {
        let body = CreateRealityDataRequest {
            reality_data: RealityDataBody {
                display_name: name,
                classification: "Undefined",
                data_type,
            },
            project_id,
        };
        let created: RealityDataEnvelope = self
            .send_json(self.service(Method::POST, "/realitydata/").json(&body))
            .await?;
        Ok(created.reality_data.id)
    }

    async fn container_url(
        &self,
        id: &str,
        project_id: &str,
        access: &str,
    ) -> Result<Url, ApiError> {
        let request = self
            .service(Method::GET, &format!("/realitydata/{id}/container"))
            .query(&[("projectId", project_id), ("access", access)]);
        let envelope: ContainerEnvelope = self.send_json(request).await?;
        let href = envelope.container.links.container_url.href;
        Url::parse(&href).map_err(|e| ApiError::InvalidResponse(format!("container URL {href:?}: {e}")))
    }

    async fn set_authoring(&self, id: &str, project_id: &str, authoring: bool) -> Result<(), ApiError> {
        let body = UpdateRealityDataRequest {
            reality_data: AuthoringFlag { authoring },
            project_id,
        };
        self.send_empty(
            self.service(Method::PATCH, &format!("/realitydata/{id}"))
                .json(&body),
        )
        .await
    }

    async fn put_files(&self, container: &Url, files: Vec<LocalFile>) -> Result<TransferSummary, ApiError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let tracker = self.tracker(files.iter().map(|f| f.size).sum());
        let mut tasks = JoinSet::new();

        for file in files {
            let url = blob_url(container, &file.relative)?;
            let client = self.blob_client.clone();
            let semaphore = Arc::clone(&semaphore);
            let tracker = Arc::clone(&tracker);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.map_err(io_other)?;
                if tracker.is_stopped() {
                    return Err(ApiError::TransferStopped);
                }
                debug!(blob = %file.relative, bytes = file.size, "uploading blob");
                put_blob(&client, url, &file, tracker).await
            });
        }

        collect_transfers(tasks).await
    }

    async fn list_blobs(&self, container: &Url) -> Result<Vec<BlobEntry>, ApiError> {
        let mut blobs = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut url = container.clone();
            {
                let mut query = url.query_pairs_mut();
                query
                    .append_pair("restype", "container")
                    .append_pair("comp", "list");
                if let Some(marker) = &marker {
                    query.append_pair("marker", marker);
                }
            }

            let response = check_status(self.blob_client.get(url).send().await?).await?;
            let (page, next) = parse_blob_list(&response.text().await?);
            blobs.extend(page);

            match next {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        Ok(blobs)
    }

    async fn get_blobs(
        &self,
        container: &Url,
        blobs: Vec<BlobEntry>,
        dest_dir: &Path,
    ) -> Result<TransferSummary, ApiError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let tracker = self.tracker(blobs.iter().map(|b| b.size).sum());
        let mut tasks = JoinSet::new();

        for blob in blobs {
            let url = blob_url(container, &blob.name)?;
            let target = blob_target(dest_dir, &blob.name)?;
            let client = self.blob_client.clone();
            let semaphore = Arc::clone(&semaphore);
            let tracker = Arc::clone(&tracker);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.map_err(io_other)?;
                if tracker.is_stopped() {
                    return Err(ApiError::TransferStopped);
                }
                debug!(blob = %blob.name, bytes = blob.size, "downloading blob");
                get_blob(&client, url, &target, &tracker).await
            });
        }

        collect_transfers(tasks).await
    }
}

impl DataTransfer for RealityClient {
    async fn upload(
        &self,
        path: &Path,
        name: &str,
        data_type: &str,
        project_id: &str,
    ) -> Result<String, ApiError> {
        let files = collect_files(path).await?;
        if files.is_empty() {
            warn!(path = %path.display(), "uploading an empty directory");
        }

        let id = self.create_reality_data(name, data_type, project_id).await?;
        info!(%id, name, files = files.len(), "created reality data, uploading files");
        let container = self.container_url(&id, project_id, "Write").await?;

        self.set_authoring(&id, project_id, true).await?;
        let uploaded = self.put_files(&container, files).await;
        // Always release the authoring flag, even after a failed transfer.
        let released = self.set_authoring(&id, project_id, false).await;
        let summary = uploaded?;
        released?;

        info!(%id, files = summary.files, bytes = summary.bytes, "upload complete");
        Ok(id)
    }

    async fn download(
        &self,
        cloud_id: &str,
        dest_dir: &Path,
        project_id: &str,
    ) -> Result<TransferSummary, ApiError> {
        let container = self.container_url(cloud_id, project_id, "Read").await?;
        let blobs = self.list_blobs(&container).await?;
        if blobs.is_empty() {
            warn!(%cloud_id, "reality data has no files");
        }

        tokio::fs::create_dir_all(dest_dir).await?;
        let summary = self.get_blobs(&container, blobs, dest_dir).await?;
        info!(
            %cloud_id,
            dest = %dest_dir.display(),
            files = summary.files,
            bytes = summary.bytes,
            "download complete"
        );
        Ok(summary)
    }
}

impl JobStatusSource for RealityClient {
    async fn job_progress(&self, job_id: &str) -> Result<JobProgress, ApiError> {
        let envelope: ProgressEnvelope = self
            .send_json(self.service(Method::GET, &format!("/contextcapture/jobs/{job_id}/progress")))
            .await?;
        JobProgress::try_from(envelope.job_progress)
    }
}

impl JobService for RealityClient {
    async fn create_workspace(&self, name: &str, project_id: &str) -> Result<String, ApiError> {
        let body = CreateWorkspaceRequest { name, project_id };
        let created: WorkspaceEnvelope = self
            .send_json(
                self.service(Method::POST, "/contextcapture/workspaces")
                    .json(&body),
            )
            .await?;
        Ok(created.workspace.id)
    }

    async fn create_job(
        &self,
        settings: &JobSettings,
        name: &str,
        workspace_id: &str,
    ) -> Result<String, ApiError> {
        let body = CreateJobRequest::new(settings, name, workspace_id);
        let created: JobEnvelope = self
            .send_json(self.service(Method::POST, "/contextcapture/jobs").json(&body))
            .await?;
        Ok(created.job.id)
    }

    async fn submit_job(&self, job_id: &str) -> Result<(), ApiError> {
        self.send_empty(
            self.service(Method::PATCH, &format!("/contextcapture/jobs/{job_id}"))
                .json(&SubmitJobRequest { state: "active" }),
        )
        .await
    }

    async fn job_properties(&self, job_id: &str) -> Result<JobProperties, ApiError> {
        let envelope: JobEnvelope = self
            .send_json(self.service(Method::GET, &format!("/contextcapture/jobs/{job_id}")))
            .await?;
        Ok(envelope.job.into())
    }
}

/// Turns a non-2xx response into [`ApiError::Status`].
async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) if !envelope.error.code.is_empty() || !envelope.error.message.is_empty() => {
            (envelope.error.code, envelope.error.message)
        }
        _ => (
            status.canonical_reason().unwrap_or("error").to_string(),
            body.trim().to_string(),
        ),
    };

    Err(ApiError::Status {
        status: status.as_u16(),
        code,
        message,
    })
}

struct LocalFile {
    path: PathBuf,
    /// Blob name: path relative to the upload root, `/`-separated.
    relative: String,
    size: u64,
}

async fn collect_files(root: &Path) -> Result<Vec<LocalFile>, ApiError> {
    let metadata = tokio::fs::metadata(root).await?;
    if metadata.is_file() {
        let relative = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| invalid_input(format!("{} has no file name", root.display())))?;
        return Ok(vec![LocalFile {
            path: root.to_path_buf(),
            relative,
            size: metadata.len(),
        }]);
    }

    let mut files = Vec::new();
    let mut walked = HashSet::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        // Linked directories are followed, but each real directory only once.
        if !walked.insert(tokio::fs::canonicalize(&dir).await?) {
            debug!(dir = %dir.display(), "directory already walked, skipping");
            continue;
        }
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = tokio::fs::metadata(&path).await?;
            if metadata.is_dir() {
                pending.push(path);
            } else if metadata.is_file() {
                let relative = relative_blob_name(root, &path)?;
                files.push(LocalFile {
                    path,
                    relative,
                    size: metadata.len(),
                });
            }
        }
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

fn relative_blob_name(root: &Path, path: &Path) -> Result<String, ApiError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| invalid_input(format!("{} is outside {}", path.display(), root.display())))?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    Ok(parts.join("/"))
}

fn blob_url(container: &Url, name: &str) -> Result<Url, ApiError> {
    let mut url = container.clone();
    url.path_segments_mut()
        .map_err(|_| ApiError::InvalidResponse(format!("container URL cannot hold blobs: {container}")))?
        .pop_if_empty()
        .extend(name.split('/'));
    Ok(url)
}

/// Local destination of a downloaded blob; names escaping `dest_dir` are refused.
fn blob_target(dest_dir: &Path, name: &str) -> Result<PathBuf, ApiError> {
    let relative = Path::new(name);
    let safe = !name.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(ApiError::InvalidResponse(format!("unsafe blob name {name:?}")));
    }
    Ok(dest_dir.join(relative))
}

/// Streams one file into a block blob.
async fn put_blob(
    client: &Client,
    url: Url,
    file: &LocalFile,
    tracker: Arc<TransferTracker>,
) -> Result<u64, ApiError> {
    let reader = tokio::fs::File::open(&file.path).await?;
    let progress = Arc::clone(&tracker);
    let stream = ReaderStream::new(reader).map(move |chunk| {
        let chunk = chunk?;
        if progress.advance(chunk.len() as u64) {
            Ok(chunk)
        } else {
            Err(std::io::Error::new(ErrorKind::Interrupted, "transfer stopped"))
        }
    });

    let sent = client
        .put(url)
        .header("x-ms-blob-type", "BlockBlob")
        .header(CONTENT_LENGTH, file.size)
        .body(Body::wrap_stream(stream))
        .send()
        .await;
    let response = match sent {
        Ok(response) => response,
        Err(_) if tracker.is_stopped() => return Err(ApiError::TransferStopped),
        Err(err) => return Err(err.into()),
    };
    check_status(response).await?;
    Ok(file.size)
}

/// Streams one blob to `target` chunk by chunk.
async fn get_blob(
    client: &Client,
    url: Url,
    target: &Path,
    tracker: &TransferTracker,
) -> Result<u64, ApiError> {
    let mut response = check_status(client.get(url).send().await?).await?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::File::create(target).await?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        if !tracker.advance(chunk.len() as u64) {
            return Err(ApiError::TransferStopped);
        }
    }
    file.flush().await?;
    Ok(written)
}

async fn collect_transfers(
    mut tasks: JoinSet<Result<u64, ApiError>>,
) -> Result<TransferSummary, ApiError> {
    let mut summary = TransferSummary::default();
    // Returning early drops the set, which aborts the remaining transfers.
    while let Some(joined) = tasks.join_next().await {
        let bytes = joined.map_err(io_other)??;
        summary.files += 1;
        summary.bytes += bytes;
    }
    Ok(summary)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BlobEntry {
    name: String,
    /// From `Content-Length`; 0 when the listing omits it.
    size: u64,
}

/// Extracts the blobs and the continuation marker from a container listing.
fn parse_blob_list(listing: &str) -> (Vec<BlobEntry>, Option<String>) {
    let blobs = xml::elements(listing, "Blob")
        .into_iter()
        .filter_map(|blob| {
            let name = xml::elements(blob, "Name").into_iter().next()?;
            let size = xml::elements(blob, "Content-Length")
                .into_iter()
                .next()
                .and_then(|len| len.trim().parse().ok())
                .unwrap_or(0);
            Some(BlobEntry {
                name: xml::unescape(name).into_owned(),
                size,
            })
        })
        .collect();
    let marker = xml::elements(listing, "NextMarker")
        .into_iter()
        .find(|m| !m.trim().is_empty())
        .map(|m| xml::unescape(m.trim()).into_owned());
    (blobs, marker)
}

fn invalid_input(message: String) -> ApiError {
    ApiError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, message))
}

fn io_other(err: impl std::fmt::Display) -> ApiError {
    ApiError::Io(std::io::Error::other(err.to_string()))
}
