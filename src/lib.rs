//! Orchestration of multi-stage translation jobs with post-hoc output
//! validation and repair.
//!
//! A job is one source artifact pushed through a fixed pipeline of stages
//! by an opaque [`engine::ExecutionEngine`]. After every run the
//! [`validator::Validator`] checks what the engine left in the
//! [`store::ArtifactStore`], heals what it can, and the
//! [`orchestrator::JobOrchestrator`] retries the whole workflow when a
//! critical stage is still missing. The [`registry::JobRegistry`] runs many
//! jobs on a bounded worker pool.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod registry;
pub mod results;
pub mod stage;
pub mod state_machine;
pub mod store;
pub mod ui;
pub mod validator;
