//! In-memory job registry and the bounded worker pool that runs jobs.
//!
//! Jobs are submitted as `Pending`, scheduled onto a pool of
//! `worker_pool_size` workers and driven to a terminal state by the
//! [`JobOrchestrator`]. The registry lock is never held across an
//! orchestration; only the state transitions take it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;

use crate::engine::{EngineInputs, ExecutionEngine};
use crate::error::{JobError, OrchestratorError};
use crate::orchestrator::{JobOrchestrator, RunOutcome};
use crate::results::JobResults;
use crate::state_machine::{Job, JobId, JobStatus, JobStatusReport};
use crate::store::ArtifactStore;
use crate::validator::ValidationReport;

/// Sizing of the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub worker_pool_size: usize,
    /// Jobs allowed to wait for a worker; `None` queues without bound.
    pub queue_capacity: Option<usize>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 3,
            queue_capacity: None,
        }
    }
}

/// Lifetime totals across every job this registry ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub fallbacks_synthesized: usize,
    pub extensions_repaired: usize,
    pub jobs_completed: usize,
    pub jobs_failed: usize,
}

#[derive(Debug, Default)]
struct HealthCounters {
    fallbacks: AtomicUsize,
    renames: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl HealthCounters {
    fn record_report(&self, report: &ValidationReport) {
        self.fallbacks.fetch_add(report.fallbacks(), Ordering::Relaxed);
        self.renames.fetch_add(report.renames(), Ordering::Relaxed);
    }

    fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            fallbacks_synthesized: self.fallbacks.load(Ordering::Relaxed),
            extensions_repaired: self.renames.load(Ordering::Relaxed),
            jobs_completed: self.completed.load(Ordering::Relaxed),
            jobs_failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
struct Entry {
    job: Job,
    scheduled: bool,
    seq: u64,
}

struct Inner<E> {
    jobs: RwLock<HashMap<JobId, Entry>>,
    orchestrator: JobOrchestrator<E>,
    permits: Arc<Semaphore>,
    config: RegistryConfig,
    /// Scheduled jobs that have not reached a terminal state.
    in_flight: AtomicUsize,
    next_seq: AtomicU64,
    changed: Notify,
    health: HealthCounters,
}

/// Shared handle to the job table; clones refer to the same registry.
pub struct JobRegistry<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for JobRegistry<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: ExecutionEngine> JobRegistry<E> {
    pub fn new(orchestrator: JobOrchestrator<E>, config: RegistryConfig) -> Self {
        let workers = config.worker_pool_size.max(1);
        Self {
            inner: Arc::new(Inner {
                jobs: RwLock::new(HashMap::new()),
                orchestrator,
                permits: Arc::new(Semaphore::new(workers)),
                config: RegistryConfig {
                    worker_pool_size: workers,
                    ..config
                },
                in_flight: AtomicUsize::new(0),
                next_seq: AtomicU64::new(0),
                changed: Notify::new(),
                health: HealthCounters::default(),
            }),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        self.inner.orchestrator.store()
    }

    /// Registers a new `Pending` job.
    ///
    /// Without an explicit name the source's file stem is used. The name
    /// must be a valid artifact directory and not belong to another job
    /// that is still pending or running.
    pub fn submit(&self, source: impl Into<PathBuf>, name: Option<String>) -> Result<JobId, JobError> {
        let source = source.into();
        let name = name.unwrap_or_else(|| {
            source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        ArtifactStore::validate_job_name(&name)?;

        let mut jobs = self.inner.jobs.write();
        let taken = jobs
            .values()
            .any(|e| e.job.name == name && !e.job.status.is_terminal());
        if taken {
            return Err(JobError::DuplicateName(name));
        }

        let job = Job::new(name, source);
        let id = job.id;
        tracing::info!(job_id = %id, job = %job.name, source = %job.source.display(), "job submitted");
        jobs.insert(
            id,
            Entry {
                job,
                scheduled: false,
                seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
            },
        );
        Ok(id)
    }

    /// Hands a pending job to the worker pool. Must be called within a
    /// Tokio runtime.
    pub fn schedule(&self, id: JobId) -> Result<JoinHandle<()>, JobError> {
        {
            let mut jobs = self.inner.jobs.write();
            let entry = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
            if entry.scheduled || entry.job.status != JobStatus::Pending {
                return Err(JobError::PreconditionFailed {
                    id,
                    status: entry.job.status,
                    expected: "an unscheduled PENDING job",
                });
            }

            if let Some(capacity) = self.inner.config.queue_capacity {
                let limit = self.inner.config.worker_pool_size + capacity;
                if self.inner.in_flight.load(Ordering::SeqCst) >= limit {
                    tracing::warn!(job_id = %id, capacity, "job queue is full");
                    return Err(JobError::QueueFull { capacity });
                }
            }

            entry.scheduled = true;
            self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        }

        tracing::debug!(job_id = %id, "job scheduled");
        let inner = Arc::clone(&self.inner);
        Ok(tokio::spawn(work(inner, id)))
    }

    /// Submits and schedules in one step.
    pub fn enqueue(&self, source: impl Into<PathBuf>, name: Option<String>) -> Result<JobId, JobError> {
        let id = self.submit(source, name)?;
        if let Err(e) = self.schedule(id) {
            self.inner.jobs.write().remove(&id);
            return Err(e);
        }
        Ok(id)
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.inner.jobs.read().get(&id).map(|e| e.job.clone())
    }

    pub fn status(&self, id: JobId) -> Result<JobStatusReport, JobError> {
        self.inner
            .jobs
            .read()
            .get(&id)
            .map(|e| JobStatusReport::from_job(&e.job))
            .ok_or(JobError::NotFound(id))
    }

    /// Every job, newest submission first.
    pub fn list(&self) -> Vec<Job> {
        let jobs = self.inner.jobs.read();
        let mut entries: Vec<&Entry> = jobs.values().collect();
        entries.sort_by(|a, b| {
            b.job
                .created_at
                .cmp(&a.job.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        entries.into_iter().map(|e| e.job.clone()).collect()
    }

    /// Artifacts of a job in a terminal state.
    pub fn results(&self, id: JobId) -> Result<JobResults, JobError> {
        let job = self.get(id).ok_or(JobError::NotFound(id))?;
        if !job.status.is_terminal() {
            return Err(JobError::PreconditionFailed {
                id,
                status: job.status,
                expected: "COMPLETED or FAILED",
            });
        }
        let validator = self.inner.orchestrator.validator();
        Ok(JobResults::collect(
            validator.store(),
            &job,
            validator.decision_fallback(),
        )?)
    }

    /// Resolves with the job once it is terminal.
    pub async fn wait(&self, id: JobId) -> Result<Job, JobError> {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let job = self.get(id).ok_or(JobError::NotFound(id))?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            notified.await;
        }
    }

    pub fn health(&self) -> HealthSnapshot {
        self.inner.health.snapshot()
    }
}

/// Worker body: wait for a pool slot, run the job, record the verdict.
async fn work<E: ExecutionEngine>(inner: Arc<Inner<E>>, id: JobId) {
    let permit = Arc::clone(&inner.permits).acquire_owned().await;

    let started = {
        let mut jobs = inner.jobs.write();
        match jobs.get_mut(&id) {
            Some(entry) => match entry.job.mark_running() {
                Ok(()) => Some(entry.job.clone()),
                Err(e) => {
                    tracing::error!(job_id = %id, error = %e, "job could not start");
                    None
                }
            },
            None => None,
        }
    };
    inner.changed.notify_waiters();

    if let Some(job) = started {
        let outcome = match &permit {
            Ok(_) => {
                // Spawned so a panicking engine still leaves the job terminal.
                let runner = Arc::clone(&inner);
                let inputs = EngineInputs::for_job(&job);
                let run_job = job.clone();
                tokio::spawn(async move { runner.orchestrator.run(&run_job, &inputs).await })
                    .await
                    .map_err(|e| format!("worker aborted: {e}"))
            }
            Err(e) => Err(format!("worker pool closed: {e}")),
        };
        record(&inner, id, outcome);
    } else {
        let _jobs = inner.jobs.write();
        inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    drop(permit);
    inner.changed.notify_waiters();
}

/// Outer error: the worker itself died before the orchestrator returned.
type WorkerOutcome = Result<Result<RunOutcome, OrchestratorError>, String>;

/// Writes the verdict and releases the queue slot under one lock, so a
/// job observed as terminal never still counts against the queue bound.
fn record<E>(inner: &Inner<E>, id: JobId, outcome: WorkerOutcome) {
    let mut jobs = inner.jobs.write();
    inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    let Some(entry) = jobs.get_mut(&id) else {
        return;
    };

    let transition = match outcome {
        Ok(Ok(run)) => {
            inner.health.record_report(&run.report);
            inner.health.completed.fetch_add(1, Ordering::Relaxed);
            tracing::info!(job_id = %id, job = %entry.job.name, attempts = run.attempts, "job completed");
            entry.job.mark_completed(run.result_summary, run.attempts)
        }
        Ok(Err(e)) => {
            inner.health.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(job_id = %id, job = %entry.job.name, error = %e, "job failed");
            entry.job.mark_failed(e.to_string(), e.attempts())
        }
        Err(reason) => {
            inner.health.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(job_id = %id, job = %entry.job.name, %reason, "job failed");
            entry.job.mark_failed(reason, 0)
        }
    };
    if let Err(e) = transition {
        tracing::error!(job_id = %id, error = %e, "could not record job verdict");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{ScriptedEngine, Step, fails, writes};
    use crate::error::StoreError;
    use crate::stage::{CodeFormat, Stage};
    use crate::validator::{FALLBACK_MARKER, Validator};
    use std::time::Duration;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn registry(
        dir: &TempDir,
        steps: Vec<Step>,
        delay: Duration,
        config: RegistryConfig,
    ) -> (Arc<ScriptedEngine>, JobRegistry<ScriptedEngine>) {
        let store = ArtifactStore::new(dir.path());
        let engine = Arc::new(ScriptedEngine::new(store.clone(), steps).with_delay(delay));
        let orchestrator = JobOrchestrator::new(
            Arc::clone(&engine),
            store.clone(),
            Validator::new(store, CodeFormat::Sql),
        );
        (engine, JobRegistry::new(orchestrator, config))
    }

    #[tokio::test]
    async fn pool_bounds_concurrent_jobs() {
        let dir = TempDir::new().unwrap();
        let (engine, registry) = registry(
            &dir,
            vec![writes("SQL", Some("sql"), &[])],
            Duration::from_millis(50),
            RegistryConfig {
                worker_pool_size: 2,
                queue_capacity: None,
            },
        );

        let ids: Vec<JobId> = (0..5)
            .map(|i| registry.enqueue(format!("in/job{i}.sas"), None).unwrap())
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let running = registry
            .list()
            .iter()
            .filter(|j| j.status == JobStatus::Running)
            .count();
        assert!(running <= 2, "{running} jobs running on a pool of 2");

        for id in &ids {
            let job = registry.wait(*id).await.unwrap();
            assert_eq!(job.status, JobStatus::Completed);
        }
        assert!(engine.peak() <= 2);
        assert_eq!(engine.calls(), 5);
        assert_eq!(registry.health().jobs_completed, 5);
    }

    #[tokio::test]
    async fn missing_translation_completes_with_fallback() {
        let dir = TempDir::new().unwrap();
        let (engine, registry) = registry(
            &dir,
            vec![writes("PySpark", None, &[])],
            Duration::ZERO,
            RegistryConfig::default(),
        );

        let id = registry.enqueue("in/payroll.sas", None).unwrap();
        let job = registry.wait(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempts, 1);
        assert_eq!(engine.calls(), 1);

        let results = registry.results(id).unwrap();
        assert_eq!(results.job_name, "payroll");
        assert_eq!(results.tasks.len(), 5);
        let translation = results.translation.unwrap();
        assert_eq!(translation.filename, "payroll.py");
        assert!(translation.code.contains(FALLBACK_MARKER));
        assert_eq!(translation.rationale.as_deref(), Some("Faithful translation"));
        assert!(results.logs.unwrap().contains("all stages verified"));

        let health = registry.health();
        assert_eq!(health.fallbacks_synthesized, 1);
        assert_eq!(health.extensions_repaired, 0);
    }

    #[tokio::test]
    async fn critical_failure_is_recorded_on_job() {
        let dir = TempDir::new().unwrap();
        let (engine, registry) = registry(
            &dir,
            vec![writes("SQL", Some("sql"), &[Stage::Analyze])],
            Duration::ZERO,
            RegistryConfig::default(),
        );

        let id = registry.enqueue("in/payroll.sas", None).unwrap();
        let job = registry.wait(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 2);
        assert_eq!(engine.calls(), 2);
        assert!(job.error_message.unwrap().contains("analyze"));
        assert!(job.result.is_none());

        let report = registry.status(id).unwrap();
        assert_eq!(report.status, JobStatus::Failed);
        assert!(report.duration_ms.is_some());
        assert_eq!(registry.health().jobs_failed, 1);
        assert!(registry.results(id).is_ok());
    }

    #[tokio::test]
    async fn engine_errors_fail_the_job() {
        let dir = TempDir::new().unwrap();
        let (_engine, registry) = registry(
            &dir,
            vec![fails("crew unavailable")],
            Duration::ZERO,
            RegistryConfig::default(),
        );

        let id = registry.enqueue("in/payroll.sas", None).unwrap();
        let job = registry.wait(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().contains("crew unavailable"));
    }

    #[tokio::test]
    async fn results_require_terminal_job() {
        let dir = TempDir::new().unwrap();
        let (_engine, registry) = registry(
            &dir,
            vec![writes("SQL", Some("sql"), &[])],
            Duration::ZERO,
            RegistryConfig::default(),
        );

        let id = registry.submit("in/payroll.sas", None).unwrap();
        assert!(matches!(
            registry.results(id),
            Err(JobError::PreconditionFailed {
                status: JobStatus::Pending,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn active_names_are_unique() {
        let dir = TempDir::new().unwrap();
        let (_engine, registry) = registry(
            &dir,
            vec![writes("SQL", Some("sql"), &[])],
            Duration::ZERO,
            RegistryConfig::default(),
        );

        let first = registry.submit("a/payroll.sas", None).unwrap();
        assert!(matches!(
            registry.submit("b/payroll.sas", None),
            Err(JobError::DuplicateName(name)) if name == "payroll"
        ));
        registry
            .submit("b/payroll.sas", Some("payroll_b".into()))
            .unwrap();

        registry.schedule(first).unwrap();
        registry.wait(first).await.unwrap();
        assert!(registry.submit("c/payroll.sas", None).is_ok());
    }

    #[tokio::test]
    async fn reused_name_does_not_inherit_earlier_artifacts() {
        let dir = TempDir::new().unwrap();
        let (engine, registry) = registry(
            &dir,
            vec![
                writes("SQL", Some("sql"), &[]),
                writes(
                    "SQL",
                    Some("sql"),
                    &[Stage::Analyze, Stage::DecideFormat, Stage::Approve],
                ),
            ],
            Duration::ZERO,
            RegistryConfig::default(),
        );

        let first = registry.enqueue("a/payroll.sas", None).unwrap();
        assert_eq!(registry.wait(first).await.unwrap().status, JobStatus::Completed);

        let second = registry.enqueue("b/payroll.sas", None).unwrap();
        let job = registry.wait(second).await.unwrap();
        assert_eq!(engine.calls(), 3);
        assert_eq!(job.status, JobStatus::Failed);
        let message = job.error_message.unwrap();
        for stage in ["analyze", "decide_format", "approve"] {
            assert!(message.contains(stage), "{message}");
        }

        let results = registry.results(second).unwrap();
        assert!(results.tasks[&Stage::Analyze].is_empty());
        assert!(results.tasks[&Stage::Approve].is_empty());
    }

    #[tokio::test]
    async fn invalid_names_are_rejected() {
        let dir = TempDir::new().unwrap();
        let (_engine, registry) = registry(
            &dir,
            vec![writes("SQL", Some("sql"), &[])],
            Duration::ZERO,
            RegistryConfig::default(),
        );

        assert!(matches!(
            registry.submit("in/payroll.sas", Some("../up".into())),
            Err(JobError::Store(StoreError::InvalidPath { .. }))
        ));
        assert!(registry.list().is_empty());
    }

    #[tokio::test]
    async fn schedule_rejects_unknown_and_repeated() {
        let dir = TempDir::new().unwrap();
        let (_engine, registry) = registry(
            &dir,
            vec![writes("SQL", Some("sql"), &[])],
            Duration::ZERO,
            RegistryConfig::default(),
        );

        let unknown = Uuid::new_v4();
        assert!(matches!(registry.schedule(unknown), Err(JobError::NotFound(id)) if id == unknown));
        assert!(matches!(registry.status(unknown), Err(JobError::NotFound(_))));
        assert!(registry.get(unknown).is_none());

        let id = registry.submit("in/payroll.sas", None).unwrap();
        registry.schedule(id).unwrap();
        assert!(matches!(
            registry.schedule(id),
            Err(JobError::PreconditionFailed { .. })
        ));
        registry.wait(id).await.unwrap();
    }

    #[tokio::test]
    async fn bounded_queue_rejects_overflow() {
        let dir = TempDir::new().unwrap();
        let (_engine, registry) = registry(
            &dir,
            vec![writes("SQL", Some("sql"), &[])],
            Duration::from_secs(30),
            RegistryConfig {
                worker_pool_size: 1,
                queue_capacity: Some(1),
            },
        );

        registry.enqueue("in/a.sas", None).unwrap();
        registry.enqueue("in/b.sas", None).unwrap();
        assert!(matches!(
            registry.enqueue("in/c.sas", None),
            Err(JobError::QueueFull { capacity: 1 })
        ));
        // A rejected enqueue leaves nothing behind.
        assert_eq!(registry.list().len(), 2);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let dir = TempDir::new().unwrap();
        let (_engine, registry) = registry(
            &dir,
            vec![writes("SQL", Some("sql"), &[])],
            Duration::ZERO,
            RegistryConfig::default(),
        );

        let a = registry.submit("in/a.sas", None).unwrap();
        let b = registry.submit("in/b.sas", None).unwrap();
        let c = registry.submit("in/c.sas", None).unwrap();
        let order: Vec<JobId> = registry.list().iter().map(|j| j.id).collect();
        assert_eq!(order, vec![c, b, a]);
    }
}
