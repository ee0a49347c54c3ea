//! The fixed stage pipeline and the artifact each stage must leave behind.
//!
//! [`CONTRACT`] lists the stages in execution order together with the
//! artifact template the validator checks. The `translate` artifact's
//! extension is not static: it follows the platform chosen in the
//! `decide_format` decision artifact, see [`resolve_format`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::store::ArtifactStore;

/// One named step of the translation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Analyze,
    DecideFormat,
    Translate,
    Validate,
    Approve,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Analyze,
        Stage::DecideFormat,
        Stage::Translate,
        Stage::Validate,
        Stage::Approve,
    ];

    /// Directory name of the stage under `tasks/`.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Analyze => "analyze",
            Stage::DecideFormat => "decide_format",
            Stage::Translate => "translate",
            Stage::Validate => "validate",
            Stage::Approve => "approve",
        }
    }

    pub fn contract(self) -> &'static StageContract {
        // CONTRACT is indexed in declaration order.
        &CONTRACT[self as usize]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStage(pub String);

impl fmt::Display for UnknownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown stage: {}", self.0)
    }
}

impl std::error::Error for UnknownStage {}

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

/// Static expectations for one stage's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageContract {
    pub stage: Stage,
    /// Filename template; `{job_name}` and `{ext}` are substituted.
    pub template: &'static str,
    /// Missing output is healed in place instead of failing the job.
    /// Stages without a repair are critical: their absence fails the attempt.
    pub repairable: bool,
}

pub const CONTRACT: [StageContract; 5] = [
    StageContract {
        stage: Stage::Analyze,
        template: "analysis.json",
        repairable: false,
    },
    StageContract {
        stage: Stage::DecideFormat,
        template: "decision.json",
        repairable: false,
    },
    StageContract {
        stage: Stage::Translate,
        template: "{job_name}.{ext}",
        repairable: true,
    },
    StageContract {
        stage: Stage::Validate,
        template: "validation_report.json",
        repairable: true,
    },
    StageContract {
        stage: Stage::Approve,
        template: "final_approval.json",
        repairable: false,
    },
];

impl StageContract {
    /// Concrete filename the stage must produce for this job.
    pub fn expected_filename(&self, job_name: &str, format: CodeFormat) -> String {
        self.template
            .replace("{job_name}", job_name)
            .replace("{ext}", format.extension())
    }

    /// Whether the artifact is expected to hold a JSON document.
    pub fn is_json(&self) -> bool {
        self.template.ends_with(".json")
    }
}

/// Target platform of the translation, chosen by `decide_format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeFormat {
    #[default]
    Sql,
    #[serde(alias = "py")]
    PySpark,
}

impl CodeFormat {
    pub fn extension(self) -> &'static str {
        match self {
            CodeFormat::Sql => "sql",
            CodeFormat::PySpark => "py",
        }
    }

    /// The other member of the closed extension set.
    pub fn other(self) -> CodeFormat {
        match self {
            CodeFormat::Sql => CodeFormat::PySpark,
            CodeFormat::PySpark => CodeFormat::Sql,
        }
    }

    /// Maps a `platform_choice` token onto the closed vocabulary.
    pub fn from_choice(choice: &str) -> CodeFormat {
        if choice.trim().eq_ignore_ascii_case("pyspark") {
            CodeFormat::PySpark
        } else {
            CodeFormat::Sql
        }
    }
}

impl fmt::Display for CodeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeFormat::Sql => write!(f, "SQL"),
            CodeFormat::PySpark => write!(f, "PySpark"),
        }
    }
}

pub const DECISION_FIELD: &str = "platform_choice";

/// Reads the decision artifact and picks the translation format.
///
/// Total: a missing, unreadable or malformed decision resolves to `fallback`
/// with a degraded-mode warning.
pub fn resolve_format(store: &ArtifactStore, job_name: &str, fallback: CodeFormat) -> CodeFormat {
    let filename = Stage::DecideFormat
        .contract()
        .expected_filename(job_name, fallback);

    let content = match store.read(job_name, Stage::DecideFormat, &filename) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(job = job_name, error = %e, %fallback, "decision artifact unavailable, using fallback format");
            return fallback;
        }
    };

    let decision: serde_json::Value = match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(job = job_name, error = %e, %fallback, "decision artifact is not valid JSON, using fallback format");
            return fallback;
        }
    };

    match decision.get(DECISION_FIELD).and_then(|v| v.as_str()) {
        Some(choice) => CodeFormat::from_choice(choice),
        None => {
            tracing::warn!(job = job_name, field = DECISION_FIELD, %fallback, "decision artifact has no format choice, using fallback format");
            fallback
        }
    }
}

/// Extension of the translation artifact, `sql` or `py`. Total like
/// [`resolve_format`].
pub fn resolve_extension(store: &ArtifactStore, job_name: &str, fallback: CodeFormat) -> &'static str {
    resolve_format(store, job_name, fallback).extension()
}
