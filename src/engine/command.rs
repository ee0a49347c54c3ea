use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use super::error::EngineError;
use super::types::{EngineInputs, EngineOutput};
use super::ExecutionEngine;

const ENV_PREFIX: &str = "JOBWARDEN_";
const STDERR_TAIL: usize = 2000;
const SUMMARY_TAIL: usize = 4000;

/// Runs the workflow as an external program.
///
/// Inputs are exported as `JOBWARDEN_<KEY>` environment variables and
/// substituted for `{key}` placeholders in the arguments. The program runs in
/// the artifact root, which is also exported as `JOBWARDEN_OUTPUT_DIR`.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    output_dir: PathBuf,
}

impl CommandEngine {
    pub fn new(command: Vec<String>, output_dir: impl AsRef<Path>) -> Result<Self, EngineError> {
        let mut parts = command.into_iter();
        let program = parts.next().ok_or(EngineError::NotConfigured)?;
        Ok(Self {
            program,
            args: parts.collect(),
            output_dir: output_dir.as_ref().to_path_buf(),
        })
    }

    fn render_args(&self, inputs: &EngineInputs) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                inputs.iter().fold(arg.clone(), |acc, (key, value)| {
                    acc.replace(&format!("{{{key}}}"), value)
                })
            })
            .collect()
    }
}

impl ExecutionEngine for CommandEngine {
    async fn run(&self, inputs: &EngineInputs) -> Result<EngineOutput, EngineError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.render_args(inputs))
            .current_dir(&self.output_dir)
            .env(format!("{ENV_PREFIX}OUTPUT_DIR"), &self.output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in inputs.iter() {
            cmd.env(format!("{ENV_PREFIX}{}", key.to_ascii_uppercase()), value);
        }

        tracing::debug!(program = %self.program, job = inputs.job_name(), "spawning engine");
        let output = cmd.output().await.map_err(|source| EngineError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Exit {
                status: output.status.to_string(),
                stderr: tail(stderr.trim(), STDERR_TAIL).to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let summary = tail(stdout.trim(), SUMMARY_TAIL);
        Ok(EngineOutput {
            summary: if summary.is_empty() {
                "Engine run completed".to_string()
            } else {
                summary.to_string()
            },
        })
    }
}

/// Last `max` characters of `text`, on a char boundary.
fn tail(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    let skip = count - max;
    let start = text
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &text[start..]
}
