//! Tipos de dados trocados com os serviços de dados e de processamento.
//!
//! As structs de requisição/resposta seguem o formato JSON dos endpoints
//! `/realitydata` e `/contextcapture`. Os tipos de domínio ([`JobSettings`],
//! [`JobProperties`], [`TransferSummary`]) são o que o resto do crate enxerga.

use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::outputs::DeclaredOutputs;
use crate::state_machine::{JobProgress, JobState};

/// Configuração de um job de processamento.
///
/// Tipo de job, qualidade e formatos de saída são repassados como texto
/// opaco; o serviço é quem os valida.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSettings {
    pub job_type: String,
    pub quality: String,
    /// IDs na nuvem dos dados de entrada.
    pub inputs: Vec<String>,
    /// Formatos de saída solicitados.
    pub outputs: Vec<String>,
}

/// Propriedades finais de um job, consultadas após o término.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobProperties {
    pub id: String,
    pub name: Option<String>,
    pub state: Option<String>,
    pub outputs: DeclaredOutputs,
}

/// Totais de uma transferência (upload ou download).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSummary {
    pub files: usize,
    pub bytes: u64,
}

/// Corpo de `POST /realitydata/`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateRealityDataRequest<'a> {
    #[serde(rename = "realityData")]
    pub reality_data: RealityDataBody<'a>,
    #[serde(rename = "projectId")]
    pub project_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealityDataBody<'a> {
    pub display_name: &'a str,
    pub classification: &'a str,
    #[serde(rename = "type")]
    pub data_type: &'a str,
}

/// Corpo de `PATCH /realitydata/{id}` para marcar/desmarcar autoria.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateRealityDataRequest<'a> {
    #[serde(rename = "realityData")]
    pub reality_data: AuthoringFlag,
    #[serde(rename = "projectId")]
    pub project_id: &'a str,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AuthoringFlag {
    pub authoring: bool,
}

/// Resposta com o ID de um reality data.
#[derive(Debug, Clone, Deserialize)]
pub struct RealityDataEnvelope {
    #[serde(rename = "realityData")]
    pub reality_data: IdOnly,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdOnly {
    pub id: String,
}

/// Resposta de `GET /realitydata/{id}/container`, com a URL SAS do contêiner.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerEnvelope {
    pub container: Container,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Container {
    #[serde(rename = "_links")]
    pub links: ContainerLinks,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerLinks {
    #[serde(rename = "containerUrl")]
    pub container_url: Href,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Href {
    pub href: String,
}

/// Corpo de erro padrão: `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Corpo de `POST /contextcapture/workspaces`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateWorkspaceRequest<'a> {
    pub name: &'a str,
    #[serde(rename = "iTwinId")]
    pub project_id: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceEnvelope {
    pub workspace: IdOnly,
}

/// Corpo de `POST /contextcapture/jobs`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest<'a> {
    #[serde(rename = "type")]
    pub job_type: &'a str,
    pub name: &'a str,
    pub workspace_id: &'a str,
    pub inputs: Vec<InputRef<'a>>,
    pub settings: CreateJobSettings<'a>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputRef<'a> {
    pub id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateJobSettings<'a> {
    pub quality: &'a str,
    pub outputs: &'a [String],
}

impl<'a> CreateJobRequest<'a> {
    pub fn new(settings: &'a JobSettings, name: &'a str, workspace_id: &'a str) -> Self {
        Self {
            job_type: &settings.job_type,
            name,
            workspace_id,
            inputs: settings
                .inputs
                .iter()
                .map(|id| InputRef { id: id.as_str() })
                .collect(),
            settings: CreateJobSettings {
                quality: &settings.quality,
                outputs: &settings.outputs,
            },
        }
    }
}

/// Corpo de `PATCH /contextcapture/jobs/{id}` (submissão).
#[derive(Debug, Clone, Serialize)]
pub struct SubmitJobRequest<'a> {
    pub state: &'a str,
}

/// Resposta de `GET /contextcapture/jobs/{id}` (e da criação).
#[derive(Debug, Clone, Deserialize)]
pub struct JobEnvelope {
    pub job: JobBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobBody {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub settings: Option<JobSettingsBody>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobSettingsBody {
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub outputs: Vec<OutputBody>,
}

/// Uma saída declarada: o formato sempre existe, o ID só depois do término.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputBody {
    pub format: String,
    #[serde(default)]
    pub id: Option<String>,
}

impl From<JobBody> for JobProperties {
    fn from(body: JobBody) -> Self {
        let outputs = body
            .settings
            .unwrap_or_default()
            .outputs
            .into_iter()
            .map(|o| (o.format, o.id))
            .collect();
        Self {
            id: body.id,
            name: body.name,
            state: body.state,
            outputs,
        }
    }
}

/// Resposta de `GET /contextcapture/jobs/{id}/progress`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressEnvelope {
    #[serde(rename = "jobProgress")]
    pub job_progress: ProgressBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressBody {
    pub state: String,
    #[serde(default)]
    pub percentage: f64,
    #[serde(default)]
    pub step: String,
}

impl TryFrom<ProgressBody> for JobProgress {
    type Error = ApiError;

    fn try_from(body: ProgressBody) -> Result<Self, Self::Error> {
        let state: JobState = body.state.parse()?;
        let percent = body.percentage.round().clamp(0.0, 100.0) as u8;
        Ok(JobProgress::new(state, percent, body.step))
    }
}
