use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::engine::{EngineError, EngineInputs, ExecutionEngine};
use crate::error::{FailureKind, OrchestratorError, StoreError};
use crate::stage::Stage;
use crate::state_machine::{Job, RetryConfig};
use crate::store::ArtifactStore;
use crate::validator::{ValidationReport, Validator};

/// Longest server-requested pause honoured between attempts.
pub const MAX_RATE_LIMIT_WAIT_MS: u64 = 5 * 60 * 1000;

/// Successful end of an orchestration run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub result_summary: String,
    /// Engine invocations used, the successful one included.
    pub attempts: u32,
    /// Validation pass that accepted the job.
    pub report: ValidationReport,
}

/// Why a single attempt did not produce an accepted job.
#[derive(Debug)]
enum AttemptFailure {
    Engine(EngineError),
    Validation(Vec<Stage>),
    Store(StoreError),
}

impl AttemptFailure {
    fn kind(&self) -> FailureKind {
        match self {
            AttemptFailure::Validation(_) => FailureKind::Business,
            AttemptFailure::Engine(_) | AttemptFailure::Store(_) => FailureKind::System,
        }
    }

    fn into_terminal(self, attempts: u32) -> OrchestratorError {
        match self {
            AttemptFailure::Engine(source) => OrchestratorError::Execution { attempts, source },
            AttemptFailure::Validation(stages) => OrchestratorError::Validation { attempts, stages },
            AttemptFailure::Store(source) => OrchestratorError::Store { attempts, source },
        }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Engine(e) => write!(f, "engine failed: {e}"),
            AttemptFailure::Validation(stages) => {
                let names: Vec<&str> = stages.iter().map(|s| s.as_str()).collect();
                write!(f, "stages failed validation: {}", names.join(", "))
            }
            AttemptFailure::Store(e) => write!(f, "storage failed: {e}"),
        }
    }
}

/// Drives one job through engine runs and validation passes until the
/// outputs are accepted or the attempt budget is spent.
///
/// Every retry re-runs the whole workflow; the engine has no resumable
/// checkpoint to continue from.
pub struct JobOrchestrator<E> {
    engine: Arc<E>,
    store: ArtifactStore,
    validator: Validator,
    retry: RetryConfig,
    engine_timeout: Option<Duration>,
}

impl<E: ExecutionEngine> JobOrchestrator<E> {
    pub fn new(engine: Arc<E>, store: ArtifactStore, validator: Validator) -> Self {
        Self {
            engine,
            store,
            validator,
            retry: RetryConfig::default(),
            engine_timeout: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Deadline for a single engine invocation; expiry counts as an execution failure.
    pub fn with_engine_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.engine_timeout = timeout;
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Run the job's workflow with bounded retries.
    ///
    /// Attempts are strictly sequential. An attempt fails when the engine
    /// raises (or times out), when validation hits a storage fault, or when
    /// a stage without fallback is left unverified. The first fully verified
    /// pass returns immediately; failure of the last attempt is terminal.
    #[tracing::instrument(skip_all, fields(job_id = %job.id, job = %job.name))]
    pub async fn run(&self, job: &Job, inputs: &EngineInputs) -> Result<RunOutcome, OrchestratorError> {
        let max_attempts = self.retry.max_attempts.max(1);

        self.store
            .init_job(&job.name)
            .map_err(|source| OrchestratorError::Store { attempts: 0, source })?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::info!(attempt, max_attempts, "running workflow");
            self.journal(&job.name, &format!("Attempt {attempt}/{max_attempts} started"));

            let failure = match self.invoke(inputs).await {
                Err(e) => AttemptFailure::Engine(e),
                Ok(output) => match self.validator.validate_all(&job.name) {
                    Err(e) => AttemptFailure::Store(e),
                    Ok(report) => {
                        let failed = report.failed_stages();
                        if failed.is_empty() {
                            tracing::info!(
                                attempt,
                                fallbacks = report.fallbacks(),
                                renames = report.renames(),
                                "all stages verified"
                            );
                            self.journal(&job.name, &format!("Attempt {attempt}: all stages verified"));
                            return Ok(RunOutcome {
                                result_summary: output.summary,
                                attempts: attempt,
                                report,
                            });
                        }
                        AttemptFailure::Validation(failed)
                    }
                },
            };

            self.journal(&job.name, &format!("Attempt {attempt} failed: {failure}"));

            if attempt >= max_attempts {
                tracing::error!(attempt, kind = %failure.kind(), reason = %failure, "job failed after all attempts");
                return Err(failure.into_terminal(attempt));
            }

            let delay_ms = self.retry_delay(attempt, &failure);
            log_retry(attempt, max_attempts, &failure, delay_ms);
            if delay_ms > 0 {
                sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }

    /// Backoff before the next attempt; a rate-limited engine is given at
    /// least the wait it asked for, up to [`MAX_RATE_LIMIT_WAIT_MS`].
    fn retry_delay(&self, attempt: u32, failure: &AttemptFailure) -> u64 {
        let backoff = self.retry.delay_for_retry(attempt);
        match failure {
            AttemptFailure::Engine(EngineError::RateLimited { retry_after_ms }) => {
                backoff.max((*retry_after_ms).min(MAX_RATE_LIMIT_WAIT_MS))
            }
            _ => backoff,
        }
    }

    async fn invoke(&self, inputs: &EngineInputs) -> Result<crate::engine::EngineOutput, EngineError> {
        match self.engine_timeout {
            Some(limit) => tokio::time::timeout(limit, self.engine.run(inputs))
                .await
                .map_err(|_| EngineError::Timeout(limit))?,
            None => self.engine.run(inputs).await,
        }
    }

    fn journal(&self, job_name: &str, line: &str) {
        if let Err(e) = self.store.append_log(job_name, line) {
            tracing::warn!(job = job_name, error = %e, "could not append to workflow log");
        }
    }
}

fn log_retry(attempt: u32, max: u32, failure: &AttemptFailure, delay_ms: u64) {
    tracing::warn!(
        attempt,
        max_attempts = max,
        kind = %failure.kind(),
        reason = %failure,
        delay_ms,
        "retrying full workflow"
    );
}
