//! Instalação do subscriber de `tracing` usado pelo binário.
//!
//! `RUST_LOG` tem precedência; sem ele, `--verbose` eleva o nível padrão
//! para `debug`. Os eventos vão para stderr para não misturar com o
//! relatório impresso em stdout.

use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Filtro padrão quando `RUST_LOG` não está definido.
pub fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "jobwarden=debug,info"
    } else {
        "jobwarden=info,warn"
    }
}

/// Instala o subscriber global. Falha se outro já estiver instalado.
pub fn init_tracing(verbose: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(verbose)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .with_line_number(false)
                .with_file(false)
                .compact(),
        )
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}
