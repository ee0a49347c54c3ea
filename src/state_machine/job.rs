use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::{JobStatus, TransitionError, transition};

pub type JobId = Uuid;

/// Configuration for the full-workflow retry loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total engine invocations allowed for one job, first run included.
    pub max_attempts: u32,
    /// Base delay in milliseconds before a retry; 0 retries immediately.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based) using exponential backoff.
    /// delay = base_delay_ms * 2^(retry - 1)
    pub fn delay_for_retry(&self, retry: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(2u64.saturating_pow(retry.saturating_sub(1)))
    }
}

/// A unit of work: one source artifact pushed through the stage pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub source: PathBuf,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub result: Option<String>,
    pub attempts: u32,
}

impl Job {
    pub fn new(name: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            source: source.into(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            result: None,
            attempts: 0,
        }
    }

    pub fn mark_running(&mut self) -> Result<(), TransitionError> {
        self.status = transition(self.status, JobStatus::Running)?;
        self.started_at = Some(Utc::now().max(self.created_at));
        Ok(())
    }

    pub fn mark_completed(&mut self, result: String, attempts: u32) -> Result<(), TransitionError> {
        self.status = transition(self.status, JobStatus::Completed)?;
        self.finish(attempts);
        self.result = Some(result);
        Ok(())
    }

    pub fn mark_failed(&mut self, error: String, attempts: u32) -> Result<(), TransitionError> {
        self.status = transition(self.status, JobStatus::Failed)?;
        self.finish(attempts);
        self.error_message = Some(error);
        Ok(())
    }

    fn finish(&mut self, attempts: u32) {
        let floor = self.started_at.unwrap_or(self.created_at);
        self.completed_at = Some(Utc::now().max(floor));
        self.attempts = attempts;
    }
}

/// Boundary view of a job's lifecycle, as returned by `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub attempts: u32,
    /// Wall time between start and completion, once both are known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

impl JobStatusReport {
    pub fn from_job(job: &Job) -> Self {
        let duration_ms = match (job.started_at, job.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        };

        Self {
            id: job.id,
            name: job.name.clone(),
            status: job.status,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error_message: job.error_message.clone(),
            attempts: job.attempts,
            duration_ms,
        }
    }
}
