//! Tipos de dados trocados com o motor de execução.
//!
//! [`EngineInputs`] é o mapa de entradas nomeadas entregue a cada execução;
//! [`EngineResponse`] é o corpo JSON devolvido pelo motor HTTP, com os
//! artefatos produzidos por cada estágio.

use std::collections::BTreeMap;

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::Stage;
use crate::state_machine::Job;

pub const SOURCE_PATH: &str = "source_path";
pub const JOB_NAME: &str = "job_name";
pub const CURRENT_YEAR: &str = "current_year";

/// Entradas nomeadas de uma execução do motor.
///
/// Sempre contém `source_path`, `job_name` e `current_year` quando criado
/// via [`EngineInputs::for_job`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineInputs(BTreeMap<String, String>);

impl EngineInputs {
    pub fn for_job(job: &Job) -> Self {
        let mut inputs = Self::default();
        inputs.insert(SOURCE_PATH, job.source.display().to_string());
        inputs.insert(JOB_NAME, job.name.clone());
        inputs.insert(CURRENT_YEAR, Utc::now().year().to_string());
        inputs
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn job_name(&self) -> Option<&str> {
        self.get(JOB_NAME)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Resultado opaco de uma execução bem-sucedida.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOutput {
    /// Resumo textual devolvido pelo motor.
    pub summary: String,
}

/// Corpo da requisição enviada ao motor HTTP.
#[derive(Debug, Clone, Serialize)]
pub struct EngineRequest<'a> {
    pub inputs: &'a EngineInputs,
}

/// Resposta do motor HTTP.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineResponse {
    #[serde(default)]
    pub summary: Option<String>,
    /// Artefatos gerados; o motor pode omitir estágios que falharam.
    #[serde(default)]
    pub artifacts: Vec<ArtifactPayload>,
}

/// Um artefato entregue pelo motor para um estágio.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactPayload {
    pub stage: Stage,
    pub filename: String,
    #[serde(default)]
    pub content: String,
    /// Agente que produziu o artefato, registrado no log do estágio.
    #[serde(default = "default_agent")]
    pub agent: String,
}

fn default_agent() -> String {
    "engine".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inputs_for_job_carry_required_keys() {
        let job = Job::new("payroll", "in/payroll.sas");
        let inputs = EngineInputs::for_job(&job);
        assert_eq!(inputs.job_name(), Some("payroll"));
        assert_eq!(inputs.get(SOURCE_PATH), Some("in/payroll.sas"));
        let year: i32 = inputs.get(CURRENT_YEAR).unwrap().parse().unwrap();
        assert!(year >= 2024);
    }

    #[test]
    fn inputs_serialize_as_flat_map() {
        let mut inputs = EngineInputs::default();
        inputs.insert("job_name", "payroll");
        let json = serde_json::to_string(&EngineRequest { inputs: &inputs }).unwrap();
        assert_eq!(json, r#"{"inputs":{"job_name":"payroll"}}"#);
    }

    #[test]
    fn response_defaults_missing_fields() {
        let response: EngineResponse = serde_json::from_str(
            r#"{"artifacts":[{"stage":"decide_format","filename":"decision.json"}]}"#,
        )
        .unwrap();
        assert!(response.summary.is_none());
        assert_eq!(response.artifacts[0].stage, Stage::DecideFormat);
        assert_eq!(response.artifacts[0].agent, "engine");
        assert!(response.artifacts[0].content.is_empty());
    }
}
