//! External collaborator seams.
//!
//! The pipeline consumes these traits and never implements the underlying
//! capability itself. The `http` and `slack` submodules provide the thin
//! adapters the binary wires in.

pub mod http;
pub mod slack;

use anyhow::Result;
use thiserror::Error;

use crate::github::{FileDiff, PullRequest};
use crate::scenario::{Scenario, ScenarioResult, Validation};
use crate::storage::Subscription;

/// Why scenario generation failed. Configuration errors (bad credentials
/// to the generator) are fatal to the run; anything else degrades to the
/// default reachability scenario.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("scenario generator configuration error: {0}")]
    Configuration(String),

    #[error("scenario generation failed: {0}")]
    Transient(String),
}

/// Turns a PR diff into behavioral test scenarios.
#[async_trait::async_trait]
pub trait ScenarioGenerator: Send + Sync {
    async fn generate(
        &self,
        diff: &[FileDiff],
        target_url: &str,
    ) -> Result<Vec<Scenario>, GenerationError>;
}

/// Runs one scenario against a browser. The contract requires actions to be
/// executed in order, stopping at the first failure with the partial trace
/// recorded in `actions_executed`.
#[async_trait::async_trait]
pub trait ScenarioExecutor: Send + Sync {
    async fn execute(&self, scenario: &Scenario, target_url: &str) -> Result<ScenarioResult>;
}

/// Judges a screenshot against an expected-result description.
#[async_trait::async_trait]
pub trait VisualValidator: Send + Sync {
    async fn validate(&self, screenshot: &str, expected_result: &str) -> Result<Validation>;
}

/// Delivers run reports and pipeline errors to whoever is listening.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn report(&self, pr: &PullRequest, results: &[ScenarioResult]) -> Result<()>;
    async fn report_error(&self, pr: &PullRequest, message: &str) -> Result<()>;
}

/// Resolves a subscription's credential reference to an access token.
/// `None` means the repository is polled unauthenticated.
pub trait CredentialProvider: Send + Sync {
    fn token_for(&self, subscription: &Subscription) -> Result<Option<String>>;
}

/// Static token provider: every subscription shares one configured token
/// (or none, for public repositories).
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

impl CredentialProvider for StaticCredentials {
    fn token_for(&self, _subscription: &Subscription) -> Result<Option<String>> {
        Ok(self.token.clone())
    }
}

/// Stand-ins wired when a service URL is absent from config. The generator
/// degrades to the default reachability scenario; the executor fails the
/// scenario with a clear message so the run records why nothing ran.
pub struct UnconfiguredGenerator;

#[async_trait::async_trait]
impl ScenarioGenerator for UnconfiguredGenerator {
    async fn generate(
        &self,
        _diff: &[FileDiff],
        _target_url: &str,
    ) -> Result<Vec<Scenario>, GenerationError> {
        Err(GenerationError::Transient(
            "scenario generator not configured".to_string(),
        ))
    }
}

pub struct UnconfiguredExecutor;

#[async_trait::async_trait]
impl ScenarioExecutor for UnconfiguredExecutor {
    async fn execute(&self, _scenario: &Scenario, _target_url: &str) -> Result<ScenarioResult> {
        anyhow::bail!("scenario executor not configured")
    }
}

/// Accepts every screenshot. Wired when no vision service is configured so
/// validation never blocks a run.
pub struct UnconfiguredValidator;

#[async_trait::async_trait]
impl VisualValidator for UnconfiguredValidator {
    async fn validate(&self, _screenshot: &str, _expected_result: &str) -> Result<Validation> {
        Ok(Validation {
            is_valid: true,
            confidence: 0.0,
            issues: vec!["visual validation not configured".to_string()],
        })
    }
}

/// A notifier that drops everything. Used when no webhook is configured.
pub struct NullNotifier;

#[async_trait::async_trait]
impl Notifier for NullNotifier {
    async fn report(&self, _pr: &PullRequest, _results: &[ScenarioResult]) -> Result<()> {
        Ok(())
    }

    async fn report_error(&self, _pr: &PullRequest, _message: &str) -> Result<()> {
        Ok(())
    }
}
