//! JSON-over-HTTP adapters for the generator, executor and validator
//! collaborators. Each POSTs a small request body to a configured endpoint
//! and decodes the typed response; prompt construction and the browser
//! protocol live behind those endpoints, not here.

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use super::{GenerationError, ScenarioExecutor, ScenarioGenerator, VisualValidator};
use crate::github::FileDiff;
use crate::scenario::{Scenario, ScenarioResult, Validation};

fn endpoint_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_default()
}

pub struct HttpGenerator {
    client: Client,
    url: String,
}

impl HttpGenerator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: endpoint_client(120),
            url: url.into(),
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    diff: &'a [FileDiff],
    target_url: &'a str,
}

#[async_trait::async_trait]
impl ScenarioGenerator for HttpGenerator {
    async fn generate(
        &self,
        diff: &[FileDiff],
        target_url: &str,
    ) -> Result<Vec<Scenario>, GenerationError> {
        let response = self
            .client
            .post(&self.url)
            .json(&GenerateRequest { diff, target_url })
            .send()
            .await
            .map_err(|e| GenerationError::Transient(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            // Invalid credentials to the generator are a configuration
            // problem; retrying or degrading would hide it.
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Configuration(format!(
                "generator rejected credentials (HTTP {status}): {body}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Transient(format!(
                "generator returned HTTP {status}: {body}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Transient(e.to_string()))?;
        let scenarios = body
            .get("scenarios")
            .cloned()
            .unwrap_or(Value::Array(vec![]));
        serde_json::from_value(scenarios)
            .map_err(|e| GenerationError::Transient(format!("bad scenario payload: {e}")))
    }
}

pub struct HttpExecutor {
    client: Client,
    url: String,
}

impl HttpExecutor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            // Browser runs can take a while
            client: endpoint_client(300),
            url: url.into(),
        }
    }
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    scenario: &'a Scenario,
    target_url: &'a str,
}

#[async_trait::async_trait]
impl ScenarioExecutor for HttpExecutor {
    async fn execute(&self, scenario: &Scenario, target_url: &str) -> Result<ScenarioResult> {
        let response = self
            .client
            .post(&self.url)
            .json(&ExecuteRequest { scenario, target_url })
            .send()
            .await
            .context("Executor request failed")?
            .error_for_status()
            .context("Executor returned an error status")?;

        response.json().await.context("Bad executor response")
    }
}

pub struct HttpValidator {
    client: Client,
    url: String,
}

impl HttpValidator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: endpoint_client(120),
            url: url.into(),
        }
    }
}

#[derive(Serialize)]
struct ValidateRequest<'a> {
    screenshot: &'a str,
    expected_result: &'a str,
}

#[async_trait::async_trait]
impl VisualValidator for HttpValidator {
    async fn validate(&self, screenshot: &str, expected_result: &str) -> Result<Validation> {
        let response = self
            .client
            .post(&self.url)
            .json(&ValidateRequest {
                screenshot,
                expected_result,
            })
            .send()
            .await
            .context("Validator request failed")?
            .error_for_status()
            .context("Validator returned an error status")?;

        response.json().await.context("Bad validator response")
    }
}
