use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::task::JoinSet;

use jobwarden::cli::{Cli, Command};
use jobwarden::config::JobwardenConfig;
use jobwarden::engine::ConfiguredEngine;
use jobwarden::error::JobError;
use jobwarden::logging;
use jobwarden::orchestrator::JobOrchestrator;
use jobwarden::registry::JobRegistry;
use jobwarden::state_machine::{JobId, JobStatus};
use jobwarden::store::ArtifactStore;
use jobwarden::ui::{self, RunProgress};
use jobwarden::validator::Validator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose)?;

    let mut config = match &cli.config {
        Some(path) => JobwardenConfig::load_from(path)?,
        None => JobwardenConfig::load()?,
    };
    if let Some(max_attempts) = cli.max_attempts {
        config.max_attempts = max_attempts;
    }
    if let Some(workers) = cli.workers {
        config.worker_pool_size = usize::try_from(workers).unwrap_or(usize::MAX);
    }

    let store = ArtifactStore::new(&config.output_dir);
    match cli.command {
        Command::Run { sources, name } => run(&config, store, sources, name).await,
        Command::Validate { job_name } => validate(&config, &store, &job_name),
    }
}

async fn run(
    config: &JobwardenConfig,
    store: ArtifactStore,
    sources: Vec<PathBuf>,
    name: Option<String>,
) -> Result<()> {
    if name.is_some() && sources.len() > 1 {
        bail!("--name can only be used with a single source");
    }

    let engine = ConfiguredEngine::from_config(&config.engine, store.clone())
        .context("no usable execution engine; set [engine] command or url")?;
    let validator = Validator::new(store.clone(), config.decision_fallback);
    let orchestrator = JobOrchestrator::new(Arc::new(engine), store, validator)
        .with_retry(config.retry_config())
        .with_engine_timeout(config.engine_timeout());
    let registry = JobRegistry::new(orchestrator, config.registry_config());

    let mut ids = Vec::with_capacity(sources.len());
    for source in &sources {
        let id = registry
            .submit(source.clone(), name.clone())
            .with_context(|| format!("could not submit {}", source.display()))?;
        ids.push(id);
    }

    let mut progress = RunProgress::start(ids.len());
    let mut waiting = JoinSet::new();
    for (i, &id) in ids.iter().enumerate() {
        schedule_when_room(&registry, id, &ids[..i]).await?;
        let registry = registry.clone();
        waiting.spawn(async move { registry.wait(id).await });
    }

    let mut failed = 0;
    while let Some(joined) = waiting.join_next().await {
        let job = joined.context("job watcher aborted")??;
        if job.status == JobStatus::Failed {
            failed += 1;
        }
        progress.job_finished(&job);
    }
    progress.finish();

    for id in &ids {
        ui::print_results(&registry.results(*id)?);
    }
    println!();
    ui::print_health(&registry.health());

    if failed > 0 {
        bail!("{failed} of {} job(s) failed", ids.len());
    }
    Ok(())
}

/// Schedules `id`, waiting for an earlier job to finish while the queue is full.
async fn schedule_when_room<E>(registry: &JobRegistry<E>, id: JobId, earlier: &[JobId]) -> Result<()>
where
    E: jobwarden::engine::ExecutionEngine,
{
    loop {
        match registry.schedule(id) {
            Ok(_) => return Ok(()),
            Err(JobError::QueueFull { .. }) => {
                let running = earlier.iter().copied().find(|other| {
                    registry
                        .get(*other)
                        .is_some_and(|job| !job.status.is_terminal())
                });
                match running {
                    Some(other) => {
                        registry.wait(other).await?;
                    }
                    None => bail!("job queue is full with nothing left to drain"),
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn validate(config: &JobwardenConfig, store: &ArtifactStore, job_name: &str) -> Result<()> {
    let job_dir = store.job_dir(job_name)?;
    if !job_dir.is_dir() {
        bail!("no artifacts for job {job_name} under {}", job_dir.display());
    }

    let report = Validator::new(store.clone(), config.decision_fallback).validate_all(job_name)?;
    ui::print_validation(job_name, &report);

    let failed = report.failed_stages();
    if !failed.is_empty() {
        let names: Vec<&str> = failed.iter().map(|s| s.as_str()).collect();
        bail!("unverified stages: {}", names.join(", "));
    }
    Ok(())
}
