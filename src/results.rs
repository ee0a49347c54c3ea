//! Read-side view of a finished job's artifacts.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::StoreError;
use crate::stage::{CodeFormat, Stage, resolve_format};
use crate::state_machine::{Job, JobId, JobStatus};
use crate::store::ArtifactStore;

/// Everything a terminal job left on disk.
#[derive(Debug, Clone, Serialize)]
pub struct JobResults {
    pub job_id: JobId,
    pub job_name: String,
    pub status: JobStatus,
    /// One entry per stage in pipeline order, filename to content.
    pub tasks: BTreeMap<Stage, BTreeMap<String, String>>,
    /// Contents of `workflow.log`, if it was ever written.
    pub logs: Option<String>,
    pub translation: Option<TranslationResult>,
}

/// The translated code and the approver's rationale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslationResult {
    pub format: CodeFormat,
    pub filename: String,
    pub code: String,
    pub rationale: Option<String>,
}

const APPROVAL_RATIONALE: &str = "quality_assessment";

impl JobResults {
    pub fn collect(store: &ArtifactStore, job: &Job, fallback: CodeFormat) -> Result<Self, StoreError> {
        let mut tasks = BTreeMap::new();
        for stage in Stage::ALL {
            tasks.insert(stage, read_stage(store, &job.name, stage)?);
        }

        let logs = match store.read_log(&job.name) {
            Ok(logs) => logs,
            Err(e) => {
                tracing::warn!(job = %job.name, error = %e, "could not read workflow log");
                None
            }
        };

        let translation = translation(store, &job.name, &tasks, fallback);

        Ok(Self {
            job_id: job.id,
            job_name: job.name.clone(),
            status: job.status,
            tasks,
            logs,
            translation,
        })
    }
}

fn read_stage(store: &ArtifactStore, job_name: &str, stage: Stage) -> Result<BTreeMap<String, String>, StoreError> {
    let mut files = BTreeMap::new();
    for filename in store.list(job_name, stage)? {
        match store.read(job_name, stage, &filename) {
            Ok(content) => {
                files.insert(filename, content);
            }
            Err(e) => {
                tracing::warn!(job = job_name, %stage, %filename, error = %e, "skipping unreadable artifact");
            }
        }
    }
    Ok(files)
}

fn translation(
    store: &ArtifactStore,
    job_name: &str,
    tasks: &BTreeMap<Stage, BTreeMap<String, String>>,
    fallback: CodeFormat,
) -> Option<TranslationResult> {
    let translated = tasks.get(&Stage::Translate)?;
    let format = resolve_format(store, job_name, fallback);

    let (format, filename, code) = [format, format.other()].into_iter().find_map(|f| {
        let filename = Stage::Translate.contract().expected_filename(job_name, f);
        translated.get(&filename).map(|code| (f, filename, code.clone()))
    })?;

    let rationale = tasks
        .get(&Stage::Approve)
        .and_then(|files| files.get("final_approval.json"))
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
        .and_then(|approval| {
            approval
                .get(APPROVAL_RATIONALE)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        });

    Some(TranslationResult {
        format,
        filename,
        code,
        rationale,
    })
}
