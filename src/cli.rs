//! Interface de linha de comando do jobwarden baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, validate)
//! e flags globais (--config, --max-attempts, --workers, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// jobwarden: orquestra jobs de tradução em estágios e repara suas saídas.
#[derive(Debug, Parser)]
#[command(name = "jobwarden", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo de configuração; por padrão `jobwarden.toml` no diretório atual.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Execuções completas do fluxo por job antes de falhar.
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: Option<u32>,

    /// Jobs executados em paralelo.
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    pub workers: Option<u64>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submete cada fonte como um job e aguarda todos terminarem.
    Run {
        /// Arquivos de origem a traduzir.
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Nome do job; só permitido com uma única fonte.
        #[arg(long)]
        name: Option<String>,
    },

    /// Valida (e repara) os artefatos existentes de um job.
    Validate {
        /// Nome do job sob `jobs/`.
        job_name: String,
    },
}
