//! The opaque multi-stage execution engine the orchestrator drives.
//!
//! The engine takes named string inputs and, as a side effect, tries to
//! leave one artifact per stage in the [`ArtifactStore`]. Nothing about which
//! stages it actually completed is trusted; the validator checks afterwards.

pub mod command;
pub mod error;
pub mod http;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

use std::future::Future;

pub use command::CommandEngine;
pub use error::EngineError;
pub use http::HttpEngine;
pub use types::{EngineInputs, EngineOutput};

use crate::config::EngineConfig;
use crate::store::ArtifactStore;

/// Capability to run the full stage workflow once.
pub trait ExecutionEngine: Send + Sync + 'static {
    fn run(
        &self,
        inputs: &EngineInputs,
    ) -> impl Future<Output = Result<EngineOutput, EngineError>> + Send;
}

/// Engine selected from configuration.
#[derive(Debug)]
pub enum ConfiguredEngine {
    Command(CommandEngine),
    Http(HttpEngine),
}

impl ConfiguredEngine {
    /// A configured command takes precedence over a URL.
    pub fn from_config(config: &EngineConfig, store: ArtifactStore) -> Result<Self, EngineError> {
        if !config.command.is_empty() {
            return Ok(ConfiguredEngine::Command(CommandEngine::new(
                config.command.clone(),
                store.root(),
            )?));
        }
        match &config.url {
            Some(url) => Ok(ConfiguredEngine::Http(HttpEngine::new(
                url.clone(),
                config.token.clone(),
                store,
            )?)),
            None => Err(EngineError::NotConfigured),
        }
    }
}

impl ExecutionEngine for ConfiguredEngine {
    async fn run(&self, inputs: &EngineInputs) -> Result<EngineOutput, EngineError> {
        match self {
            ConfiguredEngine::Command(engine) => engine.run(inputs).await,
            ConfiguredEngine::Http(engine) => engine.run(inputs).await,
        }
    }
}
