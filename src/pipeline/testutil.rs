//! Fake collaborators and a wired-up pipeline harness for tests.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::DeployConfig;
use crate::github::{FileDiff, GithubError, PullRequest, RepoApi};
use crate::registry::RunRegistry;
use crate::scenario::{Action, ExecutedAction, Scenario, ScenarioResult, Validation};
use crate::services::{
    GenerationError, Notifier, ScenarioExecutor, ScenarioGenerator, VisualValidator,
};
use crate::storage::subscriptions::NewSubscription;
use crate::storage::{Subscription, SubscriptionStore};

use super::Pipeline;

pub const FIXED_URL: &str = "https://staging.acme.dev";

/// A scenario with `action_count` wait actions.
pub fn named_scenario(name: &str, action_count: usize) -> Scenario {
    Scenario {
        name: name.into(),
        description: format!("{name} description"),
        actions: (0..action_count).map(|_| Action::Wait { seconds: 1 }).collect(),
        expected_result: format!("{name} works"),
    }
}

#[derive(Default)]
enum GeneratorBehavior {
    #[default]
    Empty,
    Scenarios(Vec<Scenario>),
    ConfigError(String),
    TransientError(String),
}

#[derive(Default)]
pub struct FakeGenerator {
    behavior: Mutex<GeneratorBehavior>,
}

impl FakeGenerator {
    pub fn set_scenarios(&self, scenarios: Vec<Scenario>) {
        *self.behavior.lock().unwrap() = GeneratorBehavior::Scenarios(scenarios);
    }

    pub fn fail_with_config_error(&self, message: &str) {
        *self.behavior.lock().unwrap() = GeneratorBehavior::ConfigError(message.into());
    }

    pub fn fail_with_transient_error(&self, message: &str) {
        *self.behavior.lock().unwrap() = GeneratorBehavior::TransientError(message.into());
    }
}

#[async_trait::async_trait]
impl ScenarioGenerator for FakeGenerator {
    async fn generate(
        &self,
        _diff: &[FileDiff],
        _target_url: &str,
    ) -> Result<Vec<Scenario>, GenerationError> {
        match &*self.behavior.lock().unwrap() {
            GeneratorBehavior::Empty => Ok(vec![]),
            GeneratorBehavior::Scenarios(s) => Ok(s.clone()),
            GeneratorBehavior::ConfigError(m) => Err(GenerationError::Configuration(m.clone())),
            GeneratorBehavior::TransientError(m) => Err(GenerationError::Transient(m.clone())),
        }
    }
}

/// Honors the executor contract: actions run in order, the first failing
/// action stops the scenario, the partial trace is recorded.
#[derive(Default)]
pub struct FakeExecutor {
    /// scenario name -> index of the action that fails
    failures: Mutex<HashMap<String, usize>>,
    executed: Mutex<Vec<Scenario>>,
}

impl FakeExecutor {
    pub fn fail_scenario(&self, name: &str, at_action: usize) {
        self.failures.lock().unwrap().insert(name.into(), at_action);
    }

    pub fn executed_scenarios(&self) -> Vec<Scenario> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ScenarioExecutor for FakeExecutor {
    async fn execute(&self, scenario: &Scenario, _target_url: &str) -> Result<ScenarioResult> {
        self.executed.lock().unwrap().push(scenario.clone());
        let fail_at = self.failures.lock().unwrap().get(&scenario.name).copied();

        let mut trace = Vec::new();
        let mut success = true;
        let mut error = None;
        for (i, action) in scenario.actions.iter().enumerate() {
            if fail_at == Some(i) {
                trace.push(ExecutedAction {
                    action: action.clone(),
                    success: false,
                    error: Some("element not found".into()),
                    screenshot: None,
                });
                success = false;
                error = Some("element not found".to_string());
                break;
            }
            trace.push(ExecutedAction {
                action: action.clone(),
                success: true,
                error: None,
                screenshot: None,
            });
        }

        Ok(ScenarioResult {
            scenario_name: scenario.name.clone(),
            description: scenario.description.clone(),
            expected_result: scenario.expected_result.clone(),
            actions: Some(scenario.actions.clone()),
            actions_executed: trace,
            success,
            error,
            screenshot: success.then(|| "iVBORw0KGgo=".to_string()),
            validation: None,
        })
    }
}

pub struct FakeValidator {
    verdict: Mutex<(bool, Vec<String>)>,
}

impl Default for FakeValidator {
    fn default() -> Self {
        Self {
            verdict: Mutex::new((true, vec![])),
        }
    }
}

impl FakeValidator {
    pub fn set_verdict(&self, is_valid: bool, issues: Vec<String>) {
        *self.verdict.lock().unwrap() = (is_valid, issues);
    }
}

#[async_trait::async_trait]
impl VisualValidator for FakeValidator {
    async fn validate(&self, _screenshot: &str, _expected: &str) -> Result<Validation> {
        let (is_valid, issues) = self.verdict.lock().unwrap().clone();
        Ok(Validation {
            is_valid,
            confidence: if is_valid { 0.95 } else { 0.4 },
            issues,
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    reports: Mutex<Vec<(i64, usize)>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn reports(&self) -> Vec<(i64, usize)> {
        self.reports.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn report(&self, pr: &PullRequest, results: &[ScenarioResult]) -> Result<()> {
        self.reports.lock().unwrap().push((pr.number, results.len()));
        Ok(())
    }

    async fn report_error(&self, _pr: &PullRequest, message: &str) -> Result<()> {
        self.errors.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeRepoApi {
    pub open_prs: Arc<Mutex<Vec<PullRequest>>>,
    pub rate_limited: Arc<Mutex<bool>>,
}

impl FakeRepoApi {
    pub fn set_open_prs(&self, prs: Vec<PullRequest>) {
        *self.open_prs.lock().unwrap() = prs;
    }

    pub fn set_rate_limited(&self, limited: bool) {
        *self.rate_limited.lock().unwrap() = limited;
    }
}

#[async_trait::async_trait]
impl RepoApi for FakeRepoApi {
    async fn list_open_prs(&self, _owner: &str, _repo: &str) -> Result<Vec<PullRequest>, GithubError> {
        if *self.rate_limited.lock().unwrap() {
            return Err(GithubError::RateLimited { reset_at: None });
        }
        Ok(self.open_prs.lock().unwrap().clone())
    }

    async fn fetch_diff(
        &self,
        _owner: &str,
        _repo: &str,
        _number: i64,
    ) -> Result<Vec<FileDiff>, GithubError> {
        Ok(vec![FileDiff {
            filename: "src/App.tsx".into(),
            status: "modified".into(),
            patch: Some("+ <CartBadge />".into()),
        }])
    }
}

pub fn test_pr(number: i64) -> PullRequest {
    PullRequest {
        number,
        title: format!("PR {number}"),
        head_branch: "preview".into(),
        url: format!("https://github.com/acme/shop/pull/{number}"),
        created_at: Some(chrono::Utc::now()),
        updated_at: Some(chrono::Utc::now()),
    }
}

pub struct Harness {
    pub pipeline: Arc<Pipeline>,
    pub generator: Arc<FakeGenerator>,
    pub executor: Arc<FakeExecutor>,
    pub validator: Arc<FakeValidator>,
    pub notifier: Arc<RecordingNotifier>,
    pub repo_api: FakeRepoApi,
    pub store: SubscriptionStore,
    pub subscription_id: i64,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let (dir, pool) = crate::storage::testutil::temp_pool();
        let store = SubscriptionStore::new(pool.clone());
        let subscription_id = store
            .subscribe(NewSubscription {
                owner: "acme".into(),
                repo: "shop".into(),
                notify: true,
                ..Default::default()
            })
            .unwrap();

        let generator = Arc::new(FakeGenerator::default());
        let executor = Arc::new(FakeExecutor::default());
        let validator = Arc::new(FakeValidator::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let deploy_config = DeployConfig {
            default_url: Some(FIXED_URL.to_string()),
            ..Default::default()
        };
        let pipeline = Arc::new(Pipeline::new(
            RunRegistry::new(pool),
            generator.clone(),
            executor.clone(),
            validator.clone(),
            notifier.clone(),
            deploy_config,
        ));

        Self {
            pipeline,
            generator,
            executor,
            validator,
            notifier,
            repo_api: FakeRepoApi::default(),
            store,
            subscription_id,
            _dir: dir,
        }
    }

    pub fn subscription(&self) -> Subscription {
        self.store.get(self.subscription_id).unwrap().unwrap()
    }

    /// Create a pending run and mark it running, mirroring the driver's
    /// dispatch sequence.
    pub fn dispatch_run(&self, pr_number: i64) -> (i64, PullRequest, Subscription) {
        let pr = test_pr(pr_number);
        let sub = self.subscription();
        let run_id = self
            .pipeline
            .registry()
            .create_pending(sub.id, &pr, &sub.repo_full_name)
            .unwrap()
            .run_id();
        assert!(self.pipeline.registry().mark_running(run_id).unwrap());
        (run_id, pr, sub)
    }
}
