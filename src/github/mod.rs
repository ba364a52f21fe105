//! GitHub repository API collaborator -- PR listing and diff retrieval.

pub mod client;
pub mod error;

pub use self::client::GithubClient;
pub use self::error::GithubError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An open pull request as seen by the detector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PullRequest {
    pub number: i64,
    pub title: String,
    pub head_branch: String,
    pub url: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One changed file of a PR diff, as handed to the scenario generator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileDiff {
    pub filename: String,
    pub status: String,
    pub patch: Option<String>,
}

/// Trait for the repository API. The polling driver and the rerun path
/// talk to GitHub only through this seam.
#[async_trait::async_trait]
pub trait RepoApi: Send + Sync {
    /// List all open PRs of `owner/repo`.
    async fn list_open_prs(&self, owner: &str, repo: &str) -> Result<Vec<PullRequest>, GithubError>;

    /// Fetch the changed files of a PR.
    async fn fetch_diff(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<Vec<FileDiff>, GithubError>;
}
