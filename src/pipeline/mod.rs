//! Pipeline orchestrator -- sequences deployment resolution, scenario
//! generation, execution, visual validation and result persistence for one
//! PR, with per-stage error handling and cleanup.

pub mod reconstruct;
pub mod rerun;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::DeployConfig;
use crate::deploy::{Deployment, DeploymentResolver, LocalResolver, TieredResolver};
use crate::github::{FileDiff, PullRequest, RepoApi};
use crate::registry::RunRegistry;
use crate::scenario::{Scenario, ScenarioResult};
use crate::services::{
    GenerationError, Notifier, ScenarioExecutor, ScenarioGenerator, VisualValidator,
};
use crate::storage::Subscription;

/// What one pipeline run produced.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub success: bool,
    pub results: Vec<ScenarioResult>,
}

/// The orchestrator. One instance per process, shared by the polling driver
/// and all concurrent per-PR tasks; every status mutation goes through the
/// registry.
pub struct Pipeline {
    registry: RunRegistry,
    generator: Arc<dyn ScenarioGenerator>,
    executor: Arc<dyn ScenarioExecutor>,
    validator: Arc<dyn VisualValidator>,
    notifier: Arc<dyn Notifier>,
    deploy_config: DeployConfig,
    local: Option<Arc<LocalResolver>>,
}

impl Pipeline {
    pub fn new(
        registry: RunRegistry,
        generator: Arc<dyn ScenarioGenerator>,
        executor: Arc<dyn ScenarioExecutor>,
        validator: Arc<dyn VisualValidator>,
        notifier: Arc<dyn Notifier>,
        deploy_config: DeployConfig,
    ) -> Self {
        let local = match deploy_config.mode.as_deref() {
            Some("local") => Some(Arc::new(LocalResolver::new(
                deploy_config
                    .work_dir
                    .clone()
                    .unwrap_or_else(|| "pr_deployments".to_string()),
                deploy_config.port_base.unwrap_or(8000),
                deploy_config
                    .start_command
                    .clone()
                    .unwrap_or_else(|| "npm start".to_string()),
            ))),
            _ => None,
        };
        Self {
            registry,
            generator,
            executor,
            validator,
            notifier,
            deploy_config,
            local,
        }
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    pub(crate) fn generator(&self) -> &dyn ScenarioGenerator {
        self.generator.as_ref()
    }

    pub(crate) fn executor(&self) -> &dyn ScenarioExecutor {
        self.executor.as_ref()
    }

    pub(crate) fn validator(&self) -> &dyn VisualValidator {
        self.validator.as_ref()
    }

    pub(crate) fn resolver_for(&self, subscription: &Subscription) -> TieredResolver {
        TieredResolver::for_subscription(subscription, &self.deploy_config, self.local.clone())
    }

    fn rewrite_domain<'a>(&'a self, subscription: &'a Subscription) -> Option<&'a str> {
        subscription
            .base_domain
            .as_deref()
            .or(self.deploy_config.base_domain.as_deref())
    }

    /// Run the full pipeline for one PR. Must be called only after
    /// `mark_running` succeeded for `run_id`; always leaves the run in a
    /// terminal state. Errors never escape to the caller, so one PR's
    /// failure cannot poison the polling driver or sibling pipelines.
    pub async fn run(
        &self,
        run_id: i64,
        repo_api: &dyn RepoApi,
        pr: &PullRequest,
        subscription: &Subscription,
    ) {
        match self.run_inner(repo_api, pr, subscription).await {
            Ok(outcome) => {
                let marked = if outcome.success {
                    self.registry.mark_completed(run_id, &outcome.results)
                } else {
                    self.registry.mark_failed(run_id, Some(&outcome.results))
                };
                if let Err(e) = marked {
                    error!(run_id, error = %e, "Failed to persist run outcome");
                }
                info!(
                    run_id,
                    pr = pr.number,
                    success = outcome.success,
                    scenarios = outcome.results.len(),
                    "Pipeline finished"
                );
                if subscription.notify {
                    if let Err(e) = self.notifier.report(pr, &outcome.results).await {
                        warn!(run_id, error = %e, "Failed to deliver test report");
                    }
                }
            }
            Err(failure) => {
                error!(run_id, pr = pr.number, error = %failure.error, "Pipeline failed");
                if let Err(e) = self.registry.mark_failed(run_id, None) {
                    error!(run_id, error = %e, "Failed to mark run failed");
                }
                // Best-effort notify, then best-effort teardown. Neither may
                // re-raise.
                if subscription.notify {
                    if let Err(e) = self
                        .notifier
                        .report_error(pr, &failure.error.to_string())
                        .await
                    {
                        warn!(run_id, error = %e, "Failed to deliver error notification");
                    }
                }
                if failure.teardown {
                    let resolver = self.resolver_for(subscription);
                    if let Err(e) = resolver.cleanup(pr.number).await {
                        warn!(run_id, error = %e, "Deployment cleanup failed");
                    }
                }
            }
        }
    }

    async fn run_inner(
        &self,
        repo_api: &dyn RepoApi,
        pr: &PullRequest,
        subscription: &Subscription,
    ) -> Result<PipelineOutcome, PipelineFailure> {
        // Stage 1: deployment resolution
        let resolver = self.resolver_for(subscription);
        let deployment = resolver
            .resolve(pr.number, &subscription.repo_full_name, &pr.head_branch)
            .await
            .map_err(PipelineFailure::fixed)?;
        info!(pr = pr.number, url = %deployment.base_url, "Deployment resolved");

        let result = self
            .stages_after_deploy(repo_api, pr, subscription, &deployment)
            .await;
        if result.is_err() && deployment.ephemeral {
            // Attribute the teardown to this failure path; fixed URLs are
            // never torn down.
            return result.map_err(|e| PipelineFailure::ephemeral(e.error));
        }
        result
    }

    async fn stages_after_deploy(
        &self,
        repo_api: &dyn RepoApi,
        pr: &PullRequest,
        subscription: &Subscription,
        deployment: &Deployment,
    ) -> Result<PipelineOutcome, PipelineFailure> {
        // Stage 2: scenario generation from the diff
        let diff = repo_api
            .fetch_diff(&subscription.owner, &subscription.repo, pr.number)
            .await
            .context("Failed to fetch PR diff")
            .map_err(PipelineFailure::fixed)?;

        let scenarios = self
            .generate_scenarios(&diff, &deployment.base_url, pr.number)
            .await?;
        info!(pr = pr.number, count = scenarios.len(), "Scenarios ready");

        // Stage 3: execution loop, strictly in order. A failing scenario
        // records its partial trace and does not stop the loop.
        let mut results = Vec::with_capacity(scenarios.len());
        for mut scenario in scenarios {
            scenario.rewrite_for_deployment(&deployment.base_url, self.rewrite_domain(subscription));
            let result = match self.executor.execute(&scenario, &deployment.base_url).await {
                Ok(mut result) => {
                    if result.actions.is_none() {
                        result.actions = Some(scenario.actions.clone());
                    }
                    result
                }
                Err(e) => {
                    warn!(pr = pr.number, scenario = %scenario.name, error = %e, "Scenario execution errored");
                    ScenarioResult {
                        scenario_name: scenario.name.clone(),
                        description: scenario.description.clone(),
                        expected_result: scenario.expected_result.clone(),
                        actions: Some(scenario.actions.clone()),
                        actions_executed: vec![],
                        success: false,
                        error: Some(e.to_string()),
                        screenshot: None,
                        validation: None,
                    }
                }
            };
            results.push(result);
        }

        // Stage 4: visual validation. Never flips a scenario's success.
        for result in &mut results {
            let Some(screenshot) = result.screenshot.as_deref() else {
                continue;
            };
            if !result.success {
                continue;
            }
            match self
                .validator
                .validate(screenshot, &result.expected_result)
                .await
            {
                Ok(validation) => result.validation = Some(validation),
                Err(e) => {
                    warn!(scenario = %result.scenario_name, error = %e, "Visual validation errored")
                }
            }
        }

        // Stage 5: aggregate
        let success = results.iter().all(|r| r.success);
        Ok(PipelineOutcome { success, results })
    }

    /// Configuration errors propagate; anything else degrades to the
    /// default reachability scenario rather than aborting the run.
    async fn generate_scenarios(
        &self,
        diff: &[FileDiff],
        target_url: &str,
        pr_number: i64,
    ) -> Result<Vec<Scenario>, PipelineFailure> {
        match self.generator.generate(diff, target_url).await {
            Ok(scenarios) if !scenarios.is_empty() => Ok(scenarios),
            Ok(_) => {
                warn!(pr = pr_number, "Generator returned no scenarios, using default");
                Ok(vec![Scenario::default_reachability(target_url)])
            }
            Err(GenerationError::Configuration(message)) => Err(PipelineFailure::fixed(
                anyhow::anyhow!("scenario generator configuration error: {message}"),
            )),
            Err(GenerationError::Transient(message)) => {
                warn!(pr = pr_number, error = %message, "Scenario generation failed, using default");
                Ok(vec![Scenario::default_reachability(target_url)])
            }
        }
    }
}

/// A pipeline-level failure plus whether an ephemeral deployment needs
/// teardown.
struct PipelineFailure {
    error: anyhow::Error,
    teardown: bool,
}

impl PipelineFailure {
    fn fixed(error: anyhow::Error) -> Self {
        Self {
            error,
            teardown: false,
        }
    }

    fn ephemeral(error: anyhow::Error) -> Self {
        Self {
            error,
            teardown: true,
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil;
