//! Configuração do pipeline carregada a partir de `pipeline.toml`.
//!
//! A struct [`PipelineConfig`] contém os parâmetros de conexão e de execução;
//! valores ausentes no arquivo usam defaults sensíveis. As variáveis de
//! ambiente `REALITY_ACCESS_TOKEN` e `REALITY_SERVICE_URL` têm precedência
//! sobre o arquivo.
//!
//! A struct [`JobDefinition`] descreve um job a executar e é lida de um
//! arquivo TOML ou JSON passado via `--file`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::upload::InputResource;

/// Nome do arquivo de configuração procurado no diretório atual.
pub const CONFIG_FILE: &str = "pipeline.toml";

const TOKEN_ENV: &str = "REALITY_ACCESS_TOKEN";
const SERVICE_URL_ENV: &str = "REALITY_SERVICE_URL";

/// Configuração de nível superior carregada de `pipeline.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// URL base dos serviços de dados e de processamento.
    #[serde(default = "default_service_url")]
    pub service_url: String,

    /// Token de acesso enviado como `Authorization: Bearer`.
    #[serde(default)]
    pub access_token: String,

    /// Projeto ao qual os dados enviados e os workspaces pertencem.
    #[serde(default)]
    pub project_id: String,

    /// Arquivo da tabela de referências caminho local ↔ ID na nuvem.
    #[serde(default = "default_references_file")]
    pub references_file: PathBuf,

    /// Intervalo entre consultas de progresso, em segundos.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Tempo máximo de acompanhamento de um job; sem limite se ausente.
    #[serde(default)]
    pub max_poll_duration_secs: Option<u64>,

    /// Número de arquivos transferidos em paralelo.
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,

    /// Timeout de cada requisição HTTP, em segundos.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_service_url() -> String {
    "https://api.bentley.com".to_string()
}

fn default_references_file() -> PathBuf {
    PathBuf::from("references.txt")
}

// Uma consulta por minuto.
fn default_poll_interval_secs() -> u64 {
    60
}

fn default_upload_concurrency() -> usize {
    4
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            service_url: default_service_url(),
            access_token: String::new(),
            project_id: String::new(),
            references_file: default_references_file(),
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_duration_secs: None,
            upload_concurrency: default_upload_concurrency(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl PipelineConfig {
    /// Carrega a configuração de `path`, ou de `pipeline.toml` no diretório
    /// atual. Usa valores padrão se o arquivo implícito não existir; um
    /// arquivo passado explicitamente precisa existir.
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let (path, required) = match path {
            Some(p) => (p, true),
            None => (Path::new(CONFIG_FILE), false),
        };

        let mut config = if path.exists() || required {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                PipelineError::Config(format!("cannot read {}: {e}", path.display()))
            })?;
            toml::from_str::<PipelineConfig>(&contents).map_err(|e| {
                PipelineError::Config(format!("invalid {}: {e}", path.display()))
            })?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Aplica as variáveis de ambiente sobre os valores do arquivo.
    /// Valores vazios são ignorados.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup(TOKEN_ENV)
            && !token.is_empty()
        {
            self.access_token = token;
        }
        if let Some(url) = lookup(SERVICE_URL_ENV)
            && !url.is_empty()
        {
            self.service_url = url;
        }
    }

    /// Verifica os campos sem os quais nenhuma chamada remota funciona.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.access_token.trim().is_empty() {
            return Err(PipelineError::Config(format!(
                "access token missing (set access_token or {TOKEN_ENV})"
            )));
        }
        if self.project_id.trim().is_empty() {
            return Err(PipelineError::Config("project_id missing".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(PipelineError::Config(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.upload_concurrency == 0 {
            return Err(PipelineError::Config(
                "upload_concurrency must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(PipelineError::Config(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_poll_duration(&self) -> Option<Duration> {
        self.max_poll_duration_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Definição de um job: entradas, formatos de saída e destino local.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub job_name: String,

    /// Nome do workspace criado para o job; usa `job_name` se ausente.
    #[serde(default)]
    pub workspace_name: Option<String>,

    /// Tipo do job, repassado ao serviço sem interpretação.
    #[serde(default = "default_job_type")]
    pub job_type: String,

    #[serde(default = "default_quality")]
    pub quality: String,

    /// Diretório onde as saídas são baixadas.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Formatos de saída solicitados (ex.: `OBJ`, `Cesium 3D Tiles`).
    #[serde(default)]
    pub outputs: Vec<String>,

    pub inputs: Vec<InputResource>,
}

fn default_job_type() -> String {
    "Full".to_string()
}

fn default_quality() -> String {
    "Medium".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

impl JobDefinition {
    /// Lê a definição de um arquivo `.toml` ou `.json`.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("cannot read {}: {e}", path.display())))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let definition: JobDefinition = match extension.as_deref() {
            Some("json") => serde_json::from_str(&contents)
                .map_err(|e| PipelineError::Config(format!("invalid {}: {e}", path.display())))?,
            Some("toml") => toml::from_str(&contents)
                .map_err(|e| PipelineError::Config(format!("invalid {}: {e}", path.display())))?,
            _ => {
                return Err(PipelineError::Config(format!(
                    "{}: job file must end in .toml or .json",
                    path.display()
                )));
            }
        };

        definition.validate()?;
        Ok(definition)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.job_name.trim().is_empty() {
            return Err(PipelineError::Config("job_name is empty".to_string()));
        }
        if self.inputs.is_empty() {
            return Err(PipelineError::Config(format!(
                "job {} has no inputs",
                self.job_name
            )));
        }
        Ok(())
    }

    pub fn workspace_name(&self) -> &str {
        self.workspace_name.as_deref().unwrap_or(&self.job_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.references_file, PathBuf::from("references.txt"));
        assert_eq!(config.poll_interval(), Duration::from_secs(60));
        assert_eq!(config.max_poll_duration(), None);
        assert_eq!(config.upload_concurrency, 4);
        assert_eq!(config.request_timeout(), Duration::from_secs(120));
        assert!(config.access_token.is_empty());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            project_id = "p-123"
            poll_interval_secs = 30
            max_poll_duration_secs = 7200
        "#;
        let config: PipelineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.project_id, "p-123");
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.max_poll_duration(), Some(Duration::from_secs(7200)));
        assert_eq!(config.upload_concurrency, 4);
        assert_eq!(config.service_url, default_service_url());
    }

    #[test]
    fn environment_takes_precedence() {
        let mut config: PipelineConfig = toml::from_str(r#"access_token = "from-file""#).unwrap();
        let env = HashMap::from([
            (TOKEN_ENV, "from-env".to_string()),
            (SERVICE_URL_ENV, String::new()),
        ]);

        config.apply_overrides(|key| env.get(key).cloned());

        assert_eq!(config.access_token, "from-env");
        assert_eq!(config.service_url, default_service_url());
    }

    #[test]
    fn explicit_config_file_must_exist() {
        let tmp = TempDir::new().unwrap();
        let err = PipelineConfig::load(Some(&tmp.path().join("missing.toml"))).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn explicit_config_file_is_read() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("custom.toml");
        std::fs::write(&path, "project_id = \"p-9\"\nupload_concurrency = 8\n").unwrap();

        let config = PipelineConfig::load(Some(&path)).unwrap();

        assert_eq!(config.project_id, "p-9");
        assert_eq!(config.upload_concurrency, 8);
    }

    #[test]
    fn validate_requires_token_and_project() {
        let mut config = PipelineConfig::default();
        assert!(config.validate().is_err());
        config.access_token = "t".into();
        assert!(config.validate().is_err());
        config.project_id = "p".into();
        assert!(config.validate().is_ok());
        config.upload_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_request_timeout_is_rejected() {
        let mut config: PipelineConfig = toml::from_str(
            r#"
            access_token = "t"
            project_id = "p"
            request_timeout_secs = 0
        "#,
        )
        .unwrap();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("request_timeout_secs"));
        config.request_timeout_secs = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn job_definition_from_toml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("job.toml");
        std::fs::write(
            &path,
            r#"
                job_name = "Survey"
                outputs = ["OBJ", "Cesium 3D Tiles"]

                [[inputs]]
                path = "data/photos"
                name = "Photos"
                data_type = "CCImageCollection"
            "#,
        )
        .unwrap();

        let job = JobDefinition::load(&path).unwrap();

        assert_eq!(job.job_name, "Survey");
        assert_eq!(job.workspace_name(), "Survey");
        assert_eq!(job.job_type, "Full");
        assert_eq!(job.quality, "Medium");
        assert_eq!(job.output_dir, PathBuf::from("outputs"));
        assert_eq!(job.outputs, vec!["OBJ", "Cesium 3D Tiles"]);
        assert_eq!(job.inputs[0].path, PathBuf::from("data/photos"));
    }

    #[test]
    fn job_definition_from_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("job.JSON");
        std::fs::write(
            &path,
            r#"{
                "job_name": "Survey",
                "workspace_name": "Site A",
                "quality": "High",
                "output_dir": "results",
                "inputs": [{"path": "p", "name": "P", "data_type": "CCImageCollection"}]
            }"#,
        )
        .unwrap();

        let job = JobDefinition::load(&path).unwrap();

        assert_eq!(job.workspace_name(), "Site A");
        assert_eq!(job.quality, "High");
        assert!(job.outputs.is_empty());
    }

    #[test]
    fn job_definition_rejects_unknown_extension_and_empty_inputs() {
        let tmp = TempDir::new().unwrap();
        let yaml = tmp.path().join("job.yaml");
        std::fs::write(&yaml, "job_name: x").unwrap();
        assert!(JobDefinition::load(&yaml).is_err());

        let empty = tmp.path().join("job.toml");
        std::fs::write(&empty, "job_name = \"x\"\ninputs = []\n").unwrap();
        let err = JobDefinition::load(&empty).unwrap_err();
        assert!(err.to_string().contains("no inputs"));
    }
}
