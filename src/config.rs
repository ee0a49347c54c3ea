//! Configuração do jobwarden carregada a partir de `jobwarden.toml`.
//!
//! A struct [`JobwardenConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `JOBWARDEN_ENGINE_TOKEN` tem precedência sobre o
//! token do arquivo.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::registry::RegistryConfig;
use crate::stage::CodeFormat;
use crate::state_machine::RetryConfig;

/// Nome do arquivo procurado no diretório atual.
pub const CONFIG_FILE: &str = "jobwarden.toml";

/// Variável de ambiente que sobrescreve `[engine] token`.
pub const TOKEN_ENV: &str = "JOBWARDEN_ENGINE_TOKEN";

/// Configuração de nível superior carregada de `jobwarden.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobwardenConfig {
    /// Raiz do armazenamento de artefatos.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Execuções completas do fluxo antes de marcar o job como falho.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Atraso base entre tentativas, dobrado a cada nova tentativa.
    #[serde(default)]
    pub retry_delay_ms: u64,

    /// Jobs executados em paralelo.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Jobs aguardando worker além do pool; ausente = fila ilimitada.
    #[serde(default)]
    pub queue_capacity: Option<usize>,

    /// Prazo de cada execução do motor em segundos; 0 desativa.
    #[serde(default = "default_engine_timeout_secs")]
    pub engine_timeout_secs: u64,

    /// Formato assumido quando a decisão de plataforma não pode ser lida.
    #[serde(default)]
    pub decision_fallback: CodeFormat,

    #[serde(default)]
    pub engine: EngineConfig,
}

/// Seção `[engine]`: um comando externo ou uma URL HTTP.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    /// Programa e argumentos; aceita placeholders `{chave}`.
    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default)]
    pub url: Option<String>,

    /// Token bearer enviado ao motor HTTP.
    #[serde(default)]
    pub token: Option<String>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

// Valor padrão de tentativas: 2 (uma execução e uma retentativa).
fn default_max_attempts() -> u32 {
    2
}

fn default_worker_pool_size() -> usize {
    3
}

// 30 minutos.
fn default_engine_timeout_secs() -> u64 {
    1800
}

impl Default for JobwardenConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: 0,
            worker_pool_size: default_worker_pool_size(),
            queue_capacity: None,
            engine_timeout_secs: default_engine_timeout_secs(),
            decision_fallback: CodeFormat::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl JobwardenConfig {
    /// Carrega a configuração de `jobwarden.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        let path = Path::new(CONFIG_FILE);
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        config.apply_token_override(std::env::var(TOKEN_ENV).ok());
        Ok(config)
    }

    /// Carrega um arquivo explícito (`--config`); ausência é erro.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_token_override(std::env::var(TOKEN_ENV).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("não foi possível ler {}", path.display()))?;
        toml::from_str::<JobwardenConfig>(&contents)
            .with_context(|| format!("configuração inválida em {}", path.display()))
    }

    /// Variável de ambiente tem precedência sobre o arquivo; vazia é ignorada.
    fn apply_token_override(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.engine.token = Some(token);
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            base_delay_ms: self.retry_delay_ms,
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            worker_pool_size: self.worker_pool_size.max(1),
            queue_capacity: self.queue_capacity,
        }
    }

    pub fn engine_timeout(&self) -> Option<Duration> {
        (self.engine_timeout_secs > 0).then(|| Duration::from_secs(self.engine_timeout_secs))
    }
}
