//! Polling driver.
//!
//! One interval loop drives everything: each cycle walks the active,
//! auto-test subscriptions sequentially for detection, then dispatches an
//! independent pipeline task per detected PR. A subscription's watermark
//! advances once, after its whole detection pass -- never per PR -- so a
//! later cycle may re-detect a PR whose pipeline is still in flight; the
//! registry's duplicate-run guard absorbs that.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::github::{GithubClient, RepoApi};
use crate::pipeline::Pipeline;
use crate::registry::CreateOutcome;
use crate::services::CredentialProvider;
use crate::storage::{Subscription, SubscriptionStore};

use super::detect::detect;

/// Builds a repository API client for a token. Swapped out in tests.
pub type RepoApiFactory = Arc<dyn Fn(Option<&str>) -> Arc<dyn RepoApi> + Send + Sync>;

pub struct Poller {
    subscriptions: SubscriptionStore,
    pipeline: Arc<Pipeline>,
    credentials: Arc<dyn CredentialProvider>,
    api_factory: RepoApiFactory,
    /// Outstanding pipeline tasks, reaped (not awaited) at cycle start so a
    /// slow pipeline never blocks the next cycle.
    tasks: Mutex<JoinSet<()>>,
}

impl Poller {
    pub fn new(
        subscriptions: SubscriptionStore,
        pipeline: Arc<Pipeline>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self::with_api_factory(
            subscriptions,
            pipeline,
            credentials,
            Arc::new(|token| Arc::new(GithubClient::new(token)) as Arc<dyn RepoApi>),
        )
    }

    pub fn with_api_factory(
        subscriptions: SubscriptionStore,
        pipeline: Arc<Pipeline>,
        credentials: Arc<dyn CredentialProvider>,
        api_factory: RepoApiFactory,
    ) -> Self {
        Self {
            subscriptions,
            pipeline,
            credentials,
            api_factory,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// One full poll cycle over every active subscription. Failures in one
    /// subscription are logged and never poison the rest of the pass.
    pub async fn poll_all(&self) {
        self.reap_finished().await;

        let subscriptions = match self.subscriptions.list_active_auto_test() {
            Ok(subs) => subs,
            Err(e) => {
                error!(error = %e, "Failed to load subscriptions");
                return;
            }
        };
        info!(count = subscriptions.len(), "Polling active subscriptions");

        for subscription in subscriptions {
            if let Err(e) = self.poll_subscription(&subscription).await {
                error!(
                    subscription = subscription.id,
                    repo = %subscription.repo_full_name,
                    error = %e,
                    "Error polling subscription"
                );
            }
        }
    }

    async fn poll_subscription(&self, subscription: &Subscription) -> anyhow::Result<()> {
        debug!(repo = %subscription.repo_full_name, "Checking repository");

        let token = self.credentials.token_for(subscription)?;
        let api = (self.api_factory)(token.as_deref());

        let open_prs = match api
            .list_open_prs(&subscription.owner, &subscription.repo)
            .await
        {
            Ok(prs) => prs,
            Err(e) if e.is_rate_limited() => {
                // Abort this subscription's pass; the watermark stays put so
                // nothing is lost. Tokens get a far higher rate budget.
                warn!(
                    repo = %subscription.repo_full_name,
                    error = %e,
                    "Rate limited; configure a GitHub token for this subscription to raise the limit"
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let existing = self
            .pipeline
            .registry()
            .existing_pr_numbers(subscription.id)?;
        let change_set = detect(subscription, &open_prs, &existing);

        if !change_set.non_target.is_empty() {
            debug!(
                repo = %subscription.repo_full_name,
                count = change_set.non_target.len(),
                "Open PRs on non-target branches"
            );
        }

        for pr in change_set.to_test {
            match self
                .pipeline
                .registry()
                .create_pending(subscription.id, &pr, &subscription.repo_full_name)?
            {
                CreateOutcome::Created(run_id) => {
                    info!(
                        repo = %subscription.repo_full_name,
                        pr = pr.number,
                        run_id,
                        "Dispatching test pipeline"
                    );
                    let pipeline = self.pipeline.clone();
                    let api = api.clone();
                    let subscription = subscription.clone();
                    self.tasks.lock().await.spawn(async move {
                        if !pipeline.registry().mark_running(run_id).unwrap_or(false) {
                            warn!(run_id, "Run vanished before start, skipping");
                            return;
                        }
                        pipeline.run(run_id, api.as_ref(), &pr, &subscription).await;
                    });
                }
                CreateOutcome::AlreadyInFlight(run_id) => {
                    debug!(
                        repo = %subscription.repo_full_name,
                        pr = pr.number,
                        run_id,
                        "Test already pending or running"
                    );
                }
            }
        }

        // Watermark moves only after the whole detection pass for this
        // subscription succeeded.
        self.subscriptions
            .update_last_polled(subscription.id, Utc::now())?;
        Ok(())
    }

    /// Collect finished pipeline tasks for observability. Panics inside a
    /// task are contained here.
    async fn reap_finished(&self) {
        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                error!(error = %e, "Pipeline task aborted");
            }
        }
        if !tasks.is_empty() {
            debug!(outstanding = tasks.len(), "Pipelines still in flight");
        }
    }

    /// Number of pipeline tasks still in flight.
    pub async fn outstanding(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Wait for every dispatched pipeline to finish. Test-only in spirit,
    /// but also used by `poll --once` so the process does not exit with
    /// work in flight.
    pub async fn drain(&self) {
        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Pipeline task aborted");
            }
        }
    }
}

/// Main polling loop. Ticks immediately on start, then every `interval`.
pub async fn run_poll_loop(poller: Arc<Poller>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "Polling driver started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        poller.poll_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::PullRequest;
    use crate::pipeline::testutil::{named_scenario, test_pr, FakeRepoApi, Harness};
    use crate::registry::RunStatus;
    use chrono::Duration as ChronoDuration;
    use std::collections::HashSet;

    fn poller_for(harness: &Harness, api: FakeRepoApi) -> Arc<Poller> {
        let factory: RepoApiFactory =
            Arc::new(move |_token| Arc::new(api.clone()) as Arc<dyn RepoApi>);
        Arc::new(Poller::with_api_factory(
            harness.store.clone(),
            harness.pipeline.clone(),
            Arc::new(crate::services::StaticCredentials::new(None)),
            factory,
        ))
    }

    fn branch_pr(number: i64, branch: &str) -> PullRequest {
        PullRequest {
            head_branch: branch.into(),
            ..test_pr(number)
        }
    }

    #[tokio::test]
    async fn first_cycle_tests_backlog_and_advances_watermark() {
        let harness = Harness::new();
        harness.generator.set_scenarios(vec![named_scenario("s", 1)]);
        let api = FakeRepoApi::default();
        api.set_open_prs(vec![
            branch_pr(10, "preview"),
            branch_pr(11, "main"),
            branch_pr(12, "feature-x"),
        ]);
        let poller = poller_for(&harness, api);

        poller.poll_all().await;
        poller.drain().await;

        let runs = harness.pipeline.registry().list(None, 50).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].pr_number, 10);
        assert_eq!(runs[0].status, RunStatus::Completed);

        let sub = harness.subscription();
        assert!(sub.last_polled_at.is_some());
    }

    #[tokio::test]
    async fn second_cycle_skips_unchanged_prs() {
        let harness = Harness::new();
        harness.generator.set_scenarios(vec![named_scenario("s", 1)]);
        let api = FakeRepoApi::default();
        let mut pr = branch_pr(10, "preview");
        pr.updated_at = Some(Utc::now() - ChronoDuration::hours(2));
        api.set_open_prs(vec![pr]);
        let poller = poller_for(&harness, api);

        poller.poll_all().await;
        poller.drain().await;
        poller.poll_all().await;
        poller.drain().await;

        // Updated before the watermark and already covered by a run record
        let runs = harness.pipeline.registry().list(None, 50).unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_aborts_pass_without_advancing_watermark() {
        let harness = Harness::new();
        let api = FakeRepoApi::default();
        api.set_open_prs(vec![branch_pr(10, "preview")]);
        api.set_rate_limited(true);
        let poller = poller_for(&harness, api.clone());

        poller.poll_all().await;
        poller.drain().await;

        assert!(harness.pipeline.registry().list(None, 50).unwrap().is_empty());
        assert!(harness.subscription().last_polled_at.is_none());

        // The next cycle catches up once the limit clears
        api.set_rate_limited(false);
        poller.poll_all().await;
        poller.drain().await;
        assert_eq!(harness.pipeline.registry().list(None, 50).unwrap().len(), 1);
        assert!(harness.subscription().last_polled_at.is_some());
    }

    #[tokio::test]
    async fn overlapping_cycles_do_not_duplicate_runs() {
        let harness = Harness::new();
        harness.generator.set_scenarios(vec![named_scenario("s", 1)]);
        let api = FakeRepoApi::default();
        api.set_open_prs(vec![branch_pr(10, "preview")]);
        let poller = poller_for(&harness, api);

        // Two detection passes before any pipeline drain: the second sees
        // the in-flight run and must not create another.
        poller.poll_all().await;
        let sub = harness.subscription();
        let existing = harness
            .pipeline
            .registry()
            .existing_pr_numbers(sub.id)
            .unwrap();
        assert_eq!(existing, HashSet::from([10]));

        poller.poll_all().await;
        poller.drain().await;

        let runs = harness.pipeline.registry().list(None, 50).unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[tokio::test]
    async fn one_failing_pipeline_does_not_block_other_prs() {
        let harness = Harness::new();
        harness.generator.set_scenarios(vec![named_scenario("s", 1)]);
        harness.executor.fail_scenario("s", 0);
        let api = FakeRepoApi::default();
        api.set_open_prs(vec![branch_pr(10, "preview"), branch_pr(20, "preview")]);
        let poller = poller_for(&harness, api);

        poller.poll_all().await;
        poller.drain().await;

        let mut runs = harness.pipeline.registry().list(None, 50).unwrap();
        runs.sort_by_key(|r| r.pr_number);
        assert_eq!(runs.len(), 2);
        // Both pipelines ran to a terminal state independently
        assert!(runs.iter().all(|r| r.status == RunStatus::Failed));
        assert!(runs.iter().all(|r| r.completed_at.is_some()));
    }
}
