//! Scripted engines for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{EngineError, EngineInputs, EngineOutput, ExecutionEngine};
use crate::stage::Stage;
use crate::store::ArtifactStore;

/// What the engine does on one invocation, given the store and job name.
pub(crate) type Step = Arc<dyn Fn(&ArtifactStore, &str) -> Result<(), EngineError> + Send + Sync>;

/// Writes every stage artifact except `skip`; the translation uses
/// `translate_ext` (`None` writes no translation at all).
pub(crate) fn writes(platform: &'static str, translate_ext: Option<&'static str>, skip: &'static [Stage]) -> Step {
    Arc::new(move |store: &ArtifactStore, job: &str| -> Result<(), EngineError> {
        let mut files: Vec<(Stage, String, String)> = vec![
            (Stage::Analyze, "analysis.json".into(), r#"{"datasets":["payroll"]}"#.into()),
            (
                Stage::DecideFormat,
                "decision.json".into(),
                format!(r#"{{"platform_choice":"{platform}"}}"#),
            ),
            (
                Stage::Validate,
                "validation_report.json".into(),
                r#"{"verdict":"PASS"}"#.into(),
            ),
            (
                Stage::Approve,
                "final_approval.json".into(),
                r#"{"approved":true,"quality_assessment":"Faithful translation"}"#.into(),
            ),
        ];
        if let Some(ext) = translate_ext {
            files.push((Stage::Translate, format!("{job}.{ext}"), "SELECT * FROM payroll;".into()));
        }
        for (stage, filename, content) in files {
            if skip.contains(&stage) {
                continue;
            }
            store.write(job, stage, &filename, content)?;
        }
        Ok(())
    })
}

pub(crate) fn fails(message: &'static str) -> Step {
    Arc::new(move |_: &ArtifactStore, _: &str| -> Result<(), EngineError> {
        Err(EngineError::Failed(message.to_string()))
    })
}

pub(crate) fn rate_limited(retry_after_ms: u64) -> Step {
    Arc::new(move |_: &ArtifactStore, _: &str| -> Result<(), EngineError> {
        Err(EngineError::RateLimited { retry_after_ms })
    })
}

/// Leaves a directory where `analysis.json` should be, so reading it is an
/// I/O fault rather than a missing file.
pub(crate) fn blocks_analysis() -> Step {
    Arc::new(move |store: &ArtifactStore, job: &str| -> Result<(), EngineError> {
        let path = store.artifact_path(job, Stage::Analyze, "analysis.json")?;
        std::fs::create_dir_all(&path).map_err(|e| EngineError::Failed(e.to_string()))
    })
}

/// Runs `then` after removing whatever [`blocks_analysis`] left behind.
pub(crate) fn unblocks_analysis(then: Step) -> Step {
    Arc::new(move |store: &ArtifactStore, job: &str| -> Result<(), EngineError> {
        let path = store.artifact_path(job, Stage::Analyze, "analysis.json")?;
        if path.is_dir() {
            std::fs::remove_dir_all(&path).map_err(|e| EngineError::Failed(e.to_string()))?;
        }
        then(store, job)
    })
}

/// Plays one step per invocation; the last step repeats once the script runs out.
pub(crate) struct ScriptedEngine {
    store: ArtifactStore,
    steps: Vec<Step>,
    delay: Duration,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedEngine {
    pub(crate) fn new(store: ArtifactStore, steps: Vec<Step>) -> Self {
        assert!(!steps.is_empty(), "script needs at least one step");
        Self {
            store,
            steps,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of invocations observed in flight at once.
    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl ExecutionEngine for ScriptedEngine {
    async fn run(&self, inputs: &EngineInputs) -> Result<EngineOutput, EngineError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let step = Arc::clone(&self.steps[call.min(self.steps.len() - 1)]);
        let job = inputs.job_name().unwrap_or_default().to_string();
        let result = step(&self.store, &job);
        self.active.fetch_sub(1, Ordering::SeqCst);

        result.map(|()| EngineOutput {
            summary: format!("run {} of {job}", call + 1),
        })
    }
}
