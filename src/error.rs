use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::engine::EngineError;
use crate::stage::Stage;
use crate::state_machine::JobStatus;

/// Errors raised by the artifact store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested path would resolve outside the job's artifact root.
    #[error("invalid artifact path: {path}")]
    InvalidPath { path: String },

    #[error("artifact not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound { path }
        } else {
            StoreError::Io { path, source }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Terminal failures of one orchestration run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("execution engine failed after {attempts} attempt(s): {source}")]
    Execution {
        attempts: u32,
        #[source]
        source: EngineError,
    },

    #[error("stages failed validation after {attempts} attempt(s): {}", stage_list(stages))]
    Validation { attempts: u32, stages: Vec<Stage> },

    #[error("artifact store failure after {attempts} attempt(s): {source}")]
    Store {
        attempts: u32,
        #[source]
        source: StoreError,
    },
}

impl OrchestratorError {
    pub fn attempts(&self) -> u32 {
        match self {
            OrchestratorError::Execution { attempts, .. }
            | OrchestratorError::Validation { attempts, .. }
            | OrchestratorError::Store { attempts, .. } => *attempts,
        }
    }
}

fn stage_list(stages: &[Stage]) -> String {
    stages
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors surfaced by the job registry to its callers.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Job {id} is {status}, operation requires {expected}")]
    PreconditionFailed {
        id: Uuid,
        status: JobStatus,
        expected: &'static str,
    },

    #[error("Job name already in use by an active job: {0}")]
    DuplicateName(String),

    #[error("Job queue is full ({capacity} waiting)")]
    QueueFull { capacity: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Classifies an attempt failure for retry logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    /// Critical stages left without a verified artifact.
    Business,
    /// Engine error, timeout or storage fault.
    System,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Business => write!(f, "Business"),
            FailureKind::System => write!(f, "System"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_names_stages() {
        let err = OrchestratorError::Validation {
            attempts: 2,
            stages: vec![Stage::Analyze, Stage::Approve],
        };
        assert_eq!(
            err.to_string(),
            "stages failed validation after 2 attempt(s): analyze, approve"
        );
        assert_eq!(err.attempts(), 2);
    }

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err = StoreError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_not_found());

        let err = StoreError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[test]
    fn failure_kind_display() {
        assert_eq!(FailureKind::Business.to_string(), "Business");
        assert_eq!(FailureKind::System.to_string(), "System");
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StoreError>();
        assert_send_sync::<OrchestratorError>();
        assert_send_sync::<JobError>();
    }
}
