//! Re-executing a single stored scenario of a finished run.
//!
//! The run itself stays terminal; only the selected entry in its result
//! payload is replaced. An abandoned run (process died mid-pipeline) is
//! retried the same way.

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::reconstruct;
use super::Pipeline;
use crate::deploy::DeploymentResolver;
use crate::github::RepoApi;
use crate::registry::TestRun;
use crate::scenario::{Scenario, ScenarioResult};
use crate::services::GenerationError;
use crate::storage::{Subscription, SubscriptionStore};

impl Pipeline {
    /// Rerun scenario `index` of `run_id` and replace its stored result.
    pub async fn rerun_scenario(
        &self,
        store: &SubscriptionStore,
        repo_api: &dyn RepoApi,
        run_id: i64,
        index: usize,
    ) -> Result<ScenarioResult> {
        let run = self
            .registry()
            .get(run_id)?
            .with_context(|| format!("Run {run_id} not found"))?;
        let subscription = store
            .get(run.subscription_id)?
            .with_context(|| format!("Subscription {} not found", run.subscription_id))?;

        let results = run
            .results
            .as_ref()
            .with_context(|| format!("Run {run_id} has no stored results"))?;
        let stored = results
            .get(index)
            .with_context(|| format!("Run {run_id} has no scenario at index {index}"))?;

        let resolver = self.resolver_for(&subscription);
        let pr_number = run.pr_number;
        let branch = run.branch_name.as_deref().unwrap_or_default();
        let deployment = resolver
            .resolve(pr_number, &subscription.repo_full_name, branch)
            .await?;

        let scenario = self
            .reconstruct_scenario(repo_api, &run, &subscription, stored, index, &deployment.base_url)
            .await?;

        let mut scenario = scenario;
        scenario.rewrite_for_deployment(
            &deployment.base_url,
            subscription.base_domain.as_deref(),
        );

        info!(run_id, index, scenario = %scenario.name, "Rerunning scenario");
        let mut result = self
            .executor()
            .execute(&scenario, &deployment.base_url)
            .await?;
        if result.actions.is_none() {
            result.actions = Some(scenario.actions.clone());
        }

        if result.success {
            if let Some(screenshot) = result.screenshot.as_deref() {
                match self
                    .validator()
                    .validate(screenshot, &result.expected_result)
                    .await
                {
                    Ok(validation) => result.validation = Some(validation),
                    Err(e) => warn!(run_id, error = %e, "Visual validation errored on rerun"),
                }
            }
        }

        self.registry().replace_scenario_result(run_id, index, &result)?;
        Ok(result)
    }

    /// Apply the reconstruction precedence, regenerating from the diff only
    /// when the stored result carries neither actions nor a trace.
    async fn reconstruct_scenario(
        &self,
        repo_api: &dyn RepoApi,
        run: &TestRun,
        subscription: &Subscription,
        stored: &ScenarioResult,
        index: usize,
        target_url: &str,
    ) -> Result<Scenario> {
        if let Some(scenario) = reconstruct::from_stored(stored) {
            return Ok(scenario);
        }

        info!(
            run = run.id,
            scenario = %stored.scenario_name,
            "Stored result has no recoverable actions, regenerating from diff"
        );
        let diff = repo_api
            .fetch_diff(&subscription.owner, &subscription.repo, run.pr_number)
            .await
            .context("Failed to fetch PR diff for regeneration")?;
        let regenerated = match self.generator().generate(&diff, target_url).await {
            Ok(scenarios) => scenarios,
            Err(GenerationError::Configuration(message)) => {
                anyhow::bail!("scenario generator configuration error: {message}")
            }
            Err(GenerationError::Transient(message)) => {
                warn!(run = run.id, error = %message, "Regeneration failed");
                vec![]
            }
        };

        Ok(reconstruct::reconstruct(stored, index, Some(&regenerated))?)
    }
}
