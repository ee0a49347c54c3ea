//! Tipos de erro do motor de execução.
//!
//! Define [`EngineError`] com variantes para falhas de processo, erros HTTP,
//! timeout e falhas ao persistir artefatos. Todas contam como falha de
//! tentativa para o orquestrador.

use std::time::Duration;

use thiserror::Error;

use crate::error::StoreError;

/// Erros que podem ocorrer durante uma execução do motor.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Nenhum motor configurado (`[engine] command` ou `url`).
    #[error("engine not configured: set [engine] command or url")]
    NotConfigured,

    /// A execução excedeu o prazo configurado.
    #[error("engine timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Falha ao iniciar o processo do motor.
    #[error("failed to launch engine `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// O processo terminou com status diferente de zero.
    #[error("engine exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    /// O servidor retornou HTTP 429.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Qualquer outro erro HTTP (4xx/5xx).
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Falha de rede subjacente (DNS, conexão recusada).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Resposta do motor fora do formato esperado.
    #[error("invalid engine response: {0}")]
    InvalidResponse(String),

    /// Falha ao gravar um artefato entregue pelo motor.
    #[error("failed to persist engine artifact: {0}")]
    Store(#[from] StoreError),

    /// Falha reportada pelo próprio motor.
    #[error("{0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display() {
        let err = EngineError::Timeout(Duration::from_secs(90));
        assert_eq!(err.to_string(), "engine timed out after 90s");
    }

    #[test]
    fn api_error_display() {
        let err = EngineError::ApiError {
            status: 502,
            message: "bad gateway".into(),
        };
        assert_eq!(err.to_string(), "API error (status 502): bad gateway");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EngineError>();
    }
}
