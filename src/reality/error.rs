//! Tipos de erro para os clientes dos serviços remotos.
//!
//! Define [`ApiError`] com variantes para respostas de erro da API, falhas de
//! rede, falhas de disco durante transferências e respostas inesperadas. Usa
//! `thiserror` para derivar `Display` e `Error` a partir dos atributos
//! `#[error(...)]`.

use thiserror::Error;

/// Erros que podem ocorrer ao falar com os serviços de dados e de processamento.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Erro retornado pela API (ex.: 401 token inválido, 404 job inexistente).
    /// Contém o código HTTP e o `code`/`message` do corpo `{"error": {...}}`.
    #[error("API error (status {status}): {code}, {message}")]
    Status {
        status: u16,
        code: String,
        message: String,
    },

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Falha ao ler ou gravar arquivos locais durante upload ou download.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resposta com formato inesperado (campo ausente, URL inválida, ...).
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Estado de job fora da tabela de vocabulário conhecida.
    #[error("unknown job state {0:?}")]
    UnknownJobState(String),

    /// O hook de progresso pediu para interromper a transferência.
    #[error("stopped upload/download of reality data")]
    TransferStopped,
}

/// Falha de uma consulta de status de job.
pub type QueryError = ApiError;

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}
