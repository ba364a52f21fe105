//! prwatch -- automated preview testing for GitHub pull requests.
//!
//! This crate provides the core library for PR polling, change detection,
//! deployment resolution, scenario pipelines, and result persistence.

pub mod api;
pub mod config;
pub mod deploy;
pub mod github;
pub mod pipeline;
pub mod registry;
pub mod scenario;
pub mod services;
pub mod storage;
pub mod watch;

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::github::GithubClient;
use crate::pipeline::Pipeline;
use crate::registry::RunRegistry;
use crate::services::{
    CredentialProvider, Notifier, ScenarioExecutor, ScenarioGenerator, StaticCredentials,
    UnconfiguredExecutor, UnconfiguredGenerator, UnconfiguredValidator, VisualValidator,
};
use crate::storage::SubscriptionStore;
use crate::watch::Poller;

/// Build the orchestrator from config, wiring HTTP adapters for every
/// service with a configured URL and inert stand-ins for the rest.
pub fn build_pipeline(config: &Config, pool: storage::Pool) -> Arc<Pipeline> {
    let generator: Arc<dyn ScenarioGenerator> = match &config.services.generator_url {
        Some(url) => Arc::new(services::http::HttpGenerator::new(url.clone())),
        None => Arc::new(UnconfiguredGenerator),
    };
    let executor: Arc<dyn ScenarioExecutor> = match &config.services.executor_url {
        Some(url) => Arc::new(services::http::HttpExecutor::new(url.clone())),
        None => Arc::new(UnconfiguredExecutor),
    };
    let validator: Arc<dyn VisualValidator> = match &config.services.validator_url {
        Some(url) => Arc::new(services::http::HttpValidator::new(url.clone())),
        None => Arc::new(UnconfiguredValidator),
    };
    let notifier: Arc<dyn Notifier> = match &config.services.slack_webhook_url {
        Some(url) => Arc::new(services::slack::SlackNotifier::new(url.clone())),
        None => Arc::new(services::NullNotifier),
    };

    Arc::new(Pipeline::new(
        RunRegistry::new(pool),
        generator,
        executor,
        validator,
        notifier,
        config.deploy.clone(),
    ))
}

/// Start the prwatch daemon: API server plus the polling loop.
pub async fn serve(config: Config) -> Result<()> {
    tracing::info!(db_path = %config.storage.db_path, "Initializing database");
    let pool = storage::open_pool(&config.storage.db_path)?;

    let subscriptions = SubscriptionStore::new(pool.clone());
    let pipeline = build_pipeline(&config, pool);
    let credentials: Arc<dyn CredentialProvider> =
        Arc::new(StaticCredentials::new(config.github.token.clone()));

    let api_factory: watch::RepoApiFactory =
        Arc::new(|token| Arc::new(GithubClient::new(token)) as Arc<dyn github::RepoApi>);

    let poller = Arc::new(Poller::with_api_factory(
        subscriptions.clone(),
        pipeline.clone(),
        credentials.clone(),
        api_factory.clone(),
    ));

    let interval = config.poll_interval();
    tokio::spawn(async move {
        watch::run_poll_loop(poller, interval).await;
    });

    let state = api::state::AppState {
        subscriptions,
        pipeline,
        credentials,
        api_factory,
    };
    let app = api::router(state);

    let addr: std::net::SocketAddr = config.server.bind.parse()?;
    tracing::info!(%addr, "prwatch listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
