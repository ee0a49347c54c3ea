use std::time::Duration;

use reqwest::Client;

use super::error::EngineError;
use super::types::{EngineInputs, EngineOutput, EngineRequest, EngineResponse};
use super::ExecutionEngine;
use crate::store::ArtifactStore;

/// Runs the workflow on a remote service and persists the artifacts it returns.
#[derive(Debug, Clone)]
pub struct HttpEngine {
    url: String,
    token: Option<String>,
    client: Client,
    store: ArtifactStore,
}

impl HttpEngine {
    pub fn new(url: String, token: Option<String>, store: ArtifactStore) -> Result<Self, EngineError> {
        // No overall request timeout: the orchestrator owns the run deadline.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            url,
            token,
            client,
            store,
        })
    }
}

impl ExecutionEngine for HttpEngine {
    async fn run(&self, inputs: &EngineInputs) -> Result<EngineOutput, EngineError> {
        let job_name = inputs
            .job_name()
            .ok_or_else(|| EngineError::InvalidResponse("inputs carry no job_name".into()))?;

        let mut request = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .json(&EngineRequest { inputs });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(EngineError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(EngineError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: EngineResponse = response
            .json()
            .await
            .map_err(|e| EngineError::InvalidResponse(e.to_string()))?;

        for artifact in &body.artifacts {
            self.store.write_output(
                job_name,
                artifact.stage,
                &artifact.filename,
                &artifact.content,
                &artifact.agent,
            )?;
        }
        tracing::info!(job = job_name, artifacts = body.artifacts.len(), "engine response persisted");

        Ok(EngineOutput {
            summary: body
                .summary
                .unwrap_or_else(|| format!("{} artifact(s) produced", body.artifacts.len())),
        })
    }
}
