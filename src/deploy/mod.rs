//! Deployment resolution -- producing a reachable URL for a PR.
//!
//! Resolvers are tried in policy order: a subscription-level fixed base
//! domain, then a locally started process, then the configured default URL.
//! A tier failing falls through to the next; exhausting every tier fails
//! the run.

pub mod local;

pub use self::local::LocalResolver;

use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::config::DeployConfig;
use crate::storage::Subscription;

/// A resolved deployment for one PR.
#[derive(Debug, Clone, PartialEq)]
pub struct Deployment {
    /// Full base URL including scheme, no trailing slash.
    pub base_url: String,
    /// Ephemeral deployments were created for this run and get torn down on
    /// pipeline failure. Fixed/external URLs are never torn down.
    pub ephemeral: bool,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("all deployment tiers failed for PR #{pr_number}")]
    Exhausted { pr_number: i64 },

    #[error("deployment failed: {0}")]
    Failed(#[from] anyhow::Error),
}

#[async_trait::async_trait]
pub trait DeploymentResolver: Send + Sync {
    /// Produce a reachable base URL for the PR.
    async fn resolve(&self, pr_number: i64, repo: &str, branch: &str) -> Result<Deployment>;

    /// Tear down whatever `resolve` created. No-op for fixed URLs.
    async fn cleanup(&self, pr_number: i64) -> Result<()>;
}

/// Derives `pr-{number}.{domain}` from a fixed base domain. Nothing is
/// created, so there is nothing to clean up.
pub struct FixedDomainResolver {
    domain: String,
}

impl FixedDomainResolver {
    pub fn new(domain: impl Into<String>) -> Self {
        Self { domain: domain.into() }
    }
}

#[async_trait::async_trait]
impl DeploymentResolver for FixedDomainResolver {
    async fn resolve(&self, pr_number: i64, _repo: &str, _branch: &str) -> Result<Deployment> {
        Ok(Deployment {
            base_url: format!("https://pr-{pr_number}.{}", self.domain),
            ephemeral: false,
        })
    }

    async fn cleanup(&self, _pr_number: i64) -> Result<()> {
        Ok(())
    }
}

/// Last-resort tier: a fixed URL that is assumed reachable.
pub struct DefaultUrlResolver {
    url: String,
}

impl DefaultUrlResolver {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait::async_trait]
impl DeploymentResolver for DefaultUrlResolver {
    async fn resolve(&self, _pr_number: i64, _repo: &str, _branch: &str) -> Result<Deployment> {
        Ok(Deployment {
            base_url: self.url.trim_end_matches('/').to_string(),
            ephemeral: false,
        })
    }

    async fn cleanup(&self, _pr_number: i64) -> Result<()> {
        Ok(())
    }
}

/// Tries tiers in order until one resolves.
pub struct TieredResolver {
    tiers: Vec<Arc<dyn DeploymentResolver>>,
}

impl TieredResolver {
    pub fn new(tiers: Vec<Arc<dyn DeploymentResolver>>) -> Self {
        Self { tiers }
    }

    /// Build the tier chain for one subscription:
    /// fixed subscription domain -> local mode -> default URL.
    pub fn for_subscription(
        subscription: &Subscription,
        config: &DeployConfig,
        local: Option<Arc<LocalResolver>>,
    ) -> Self {
        let mut tiers: Vec<Arc<dyn DeploymentResolver>> = Vec::new();
        if let Some(domain) = &subscription.base_domain {
            tiers.push(Arc::new(FixedDomainResolver::new(domain.clone())));
        }
        if let Some(local) = local {
            tiers.push(local);
        }
        if let Some(url) = &config.default_url {
            tiers.push(Arc::new(DefaultUrlResolver::new(url.clone())));
        }
        Self { tiers }
    }
}

#[async_trait::async_trait]
impl DeploymentResolver for TieredResolver {
    async fn resolve(&self, pr_number: i64, repo: &str, branch: &str) -> Result<Deployment> {
        for tier in &self.tiers {
            match tier.resolve(pr_number, repo, branch).await {
                Ok(deployment) => return Ok(deployment),
                Err(e) => {
                    warn!(pr_number, error = %e, "Deployment tier failed, trying next");
                }
            }
        }
        Err(ResolveError::Exhausted { pr_number }.into())
    }

    async fn cleanup(&self, pr_number: i64) -> Result<()> {
        for tier in &self.tiers {
            tier.cleanup(pr_number).await?;
        }
        Ok(())
    }
}
