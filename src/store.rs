//! Filesystem-backed artifact store partitioned by job and stage.
//!
//! Layout under the configured root:
//!
//! ```text
//! jobs/{job_name}/tasks/{stage}/{filename}
//! jobs/{job_name}/logs/workflow.log
//! jobs/{job_name}/logs/{stage}.log
//! ```
//!
//! Every address is checked before touching the disk: job names must be a
//! single plain path component and filenames may only contain normal
//! components, so nothing can resolve outside `jobs/{job_name}`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use tempfile::NamedTempFile;

use crate::error::StoreError;
use crate::stage::Stage;

const WORKFLOW_LOG: &str = "workflow.log";

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rejects job names that are not a single plain path component.
    pub fn validate_job_name(job_name: &str) -> Result<(), StoreError> {
        let mut components = Path::new(job_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None)
                if !job_name.contains(['/', '\\']) && !job_name.trim().is_empty() =>
            {
                Ok(())
            }
            _ => Err(StoreError::InvalidPath {
                path: job_name.to_string(),
            }),
        }
    }

    fn validate_filename(filename: &str) -> Result<(), StoreError> {
        let path = Path::new(filename);
        let all_normal = path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if filename.is_empty() || !all_normal || path.components().next().is_none() {
            return Err(StoreError::InvalidPath {
                path: filename.to_string(),
            });
        }
        Ok(())
    }

    pub fn job_dir(&self, job_name: &str) -> Result<PathBuf, StoreError> {
        Self::validate_job_name(job_name)?;
        Ok(self.root.join("jobs").join(job_name))
    }

    pub fn stage_dir(&self, job_name: &str, stage: Stage) -> Result<PathBuf, StoreError> {
        Ok(self.job_dir(job_name)?.join("tasks").join(stage.as_str()))
    }

    pub fn logs_dir(&self, job_name: &str) -> Result<PathBuf, StoreError> {
        Ok(self.job_dir(job_name)?.join("logs"))
    }

    pub fn artifact_path(
        &self,
        job_name: &str,
        stage: Stage,
        filename: &str,
    ) -> Result<PathBuf, StoreError> {
        Self::validate_filename(filename)?;
        Ok(self.stage_dir(job_name, stage)?.join(filename))
    }

    /// Atomically writes an artifact, creating parent directories and
    /// replacing any previous content.
    pub fn write(
        &self,
        job_name: &str,
        stage: Stage,
        filename: &str,
        content: impl AsRef<[u8]>,
    ) -> Result<(), StoreError> {
        let path = self.artifact_path(job_name, stage, filename)?;
        write_atomic(&path, content.as_ref())
    }

    pub fn read(&self, job_name: &str, stage: Stage, filename: &str) -> Result<String, StoreError> {
        let path = self.artifact_path(job_name, stage, filename)?;
        fs::read_to_string(&path).map_err(|e| StoreError::io(path, e))
    }

    pub fn exists(&self, job_name: &str, stage: Stage, filename: &str) -> bool {
        self.artifact_path(job_name, stage, filename)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Renames an artifact within a stage directory.
    ///
    /// The destination is replaced atomically. When it already holds the
    /// same bytes as the source, the source is dropped and the call succeeds.
    pub fn rename(
        &self,
        job_name: &str,
        stage: Stage,
        from: &str,
        to: &str,
    ) -> Result<(), StoreError> {
        let src = self.artifact_path(job_name, stage, from)?;
        let dst = self.artifact_path(job_name, stage, to)?;

        if !src.is_file() {
            return Err(StoreError::NotFound { path: src });
        }
        if src == dst {
            return Ok(());
        }

        if dst.is_file() {
            let same = fs::read(&src).map_err(|e| StoreError::io(&src, e))?
                == fs::read(&dst).map_err(|e| StoreError::io(&dst, e))?;
            if same {
                return fs::remove_file(&src).map_err(|e| StoreError::io(src, e));
            }
        }

        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        fs::rename(&src, &dst).map_err(|e| StoreError::io(src, e))
    }

    /// Lazily lists artifact filenames of a stage. An absent stage directory
    /// yields an empty listing.
    pub fn list(&self, job_name: &str, stage: Stage) -> Result<ArtifactNames, StoreError> {
        let dir = self.stage_dir(job_name, stage)?;
        match fs::read_dir(&dir) {
            Ok(entries) => Ok(ArtifactNames {
                entries: Some(entries),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(ArtifactNames { entries: None })
            }
            Err(e) => Err(StoreError::io(dir, e)),
        }
    }

    /// Starts a run from an empty tree: artifacts and step logs left by an
    /// earlier job with the same name are removed, every stage directory is
    /// recreated and `workflow.log` gets a fresh header.
    pub fn init_job(&self, job_name: &str) -> Result<(), StoreError> {
        let tasks = self.job_dir(job_name)?.join("tasks");
        let logs = self.logs_dir(job_name)?;
        for dir in [&tasks, &logs] {
            match fs::remove_dir_all(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(dir, e)),
            }
        }

        for stage in Stage::ALL {
            let dir = self.stage_dir(job_name, stage)?;
            fs::create_dir_all(&dir).map_err(|e| StoreError::io(dir, e))?;
        }
        fs::create_dir_all(&logs).map_err(|e| StoreError::io(&logs, e))?;

        let header = format!(
            "Workflow started: {}\nJob: {job_name}\n{}\n",
            Utc::now().to_rfc3339(),
            "-".repeat(80)
        );
        let path = logs.join(WORKFLOW_LOG);
        fs::write(&path, header).map_err(|e| StoreError::io(path, e))?;

        tracing::debug!(job = job_name, "initialized job directories");
        Ok(())
    }

    /// Appends a timestamped line to the job's `workflow.log`.
    pub fn append_log(&self, job_name: &str, line: &str) -> Result<(), StoreError> {
        let logs = self.logs_dir(job_name)?;
        append_line(&logs, WORKFLOW_LOG, &format!("[{}] {line}", log_timestamp()))
    }

    pub fn read_log(&self, job_name: &str) -> Result<Option<String>, StoreError> {
        let path = self.logs_dir(job_name)?.join(WORKFLOW_LOG);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Write path for engines delivering stage output in-process.
    ///
    /// Blank content is replaced by an `empty_output` placeholder and every
    /// write is recorded in `logs/{stage}.log`.
    pub fn write_output(
        &self,
        job_name: &str,
        stage: Stage,
        filename: &str,
        content: &str,
        agent: &str,
    ) -> Result<PathBuf, StoreError> {
        let path = self.artifact_path(job_name, stage, filename)?;

        if content.trim().is_empty() {
            tracing::warn!(job = job_name, %stage, agent, "empty output, writing placeholder");
            let placeholder = serde_json::json!({
                "status": "empty_output",
                "agent": agent,
                "timestamp": Utc::now().to_rfc3339(),
                "note": "This output was empty and a placeholder was generated",
            });
            let text = serde_json::to_string_pretty(&placeholder)
                .unwrap_or_else(|_| String::from("{\"status\":\"empty_output\"}"));
            write_atomic(&path, text.as_bytes())?;
        } else {
            write_atomic(&path, content.as_bytes())?;
        }

        let step_log = format!("{}.log", stage.as_str());
        let line = format!("[{}] [{agent}] Wrote: {}", log_timestamp(), path.display());
        if let Err(e) = append_line(&self.logs_dir(job_name)?, &step_log, &line) {
            tracing::warn!(job = job_name, %stage, error = %e, "could not write step log");
        }

        tracing::info!(job = job_name, %stage, agent, path = %path.display(), "artifact written");
        Ok(path)
    }
}

/// Lazy listing of the files in one stage directory.
#[derive(Debug)]
pub struct ArtifactNames {
    entries: Option<fs::ReadDir>,
}

impl Iterator for ArtifactNames {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let entries = self.entries.as_mut()?;
        for entry in entries.by_ref() {
            let Ok(entry) = entry else { continue };
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            // In-flight temp files from atomic writes.
            if name.starts_with('.') {
                continue;
            }
            return Some(name);
        }
        None
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| StoreError::io(parent, e))?;
    tmp.write_all(content).map_err(|e| StoreError::io(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(path, e))?;
    tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}

fn append_line(dir: &Path, file: &str, line: &str) -> Result<(), StoreError> {
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
    let path = dir.join(file);
    let mut handle = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| StoreError::io(&path, e))?;
    writeln!(handle, "{line}").map_err(|e| StoreError::io(path, e))
}

fn log_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
