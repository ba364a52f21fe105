//! reqwest-backed GitHub REST client.

use super::error::GithubError;
use super::{FileDiff, PullRequest, RepoApi};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;

const API_BASE: &str = "https://api.github.com";

/// GitHub REST client. One instance per poll pass; the token (if any) comes
/// from the subscription's credential.
pub struct GithubClient {
    client: Client,
    base_url: String,
}

impl GithubClient {
    pub fn new(token: Option<&str>) -> Self {
        Self::with_base_url(token, API_BASE)
    }

    /// Point the client at a non-default API root. Used by tests and by
    /// GitHub Enterprise installs.
    pub fn with_base_url(token: Option<&str>, base_url: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("prwatch"));
        if let Some(token) = token {
            if let Ok(mut value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn check_status(response: Response) -> Result<Response, GithubError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        // 429 is always a rate limit; 403 only when the budget is spent.
        let remaining = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok());
        let reset_at = response
            .headers()
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok());

        if status == StatusCode::TOO_MANY_REQUESTS
            || (status == StatusCode::FORBIDDEN && remaining == Some(0))
        {
            return Err(GithubError::RateLimited { reset_at });
        }

        let message = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GithubError::Auth {
                status: status.as_u16(),
                message,
            });
        }

        Err(GithubError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[derive(Deserialize)]
struct RawPull {
    number: i64,
    title: Option<String>,
    html_url: String,
    head: RawHead,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RawHead {
    #[serde(rename = "ref")]
    branch: String,
}

#[derive(Deserialize)]
struct RawFile {
    filename: String,
    status: String,
    patch: Option<String>,
}

#[async_trait::async_trait]
impl RepoApi for GithubClient {
    async fn list_open_prs(&self, owner: &str, repo: &str) -> Result<Vec<PullRequest>, GithubError> {
        let url = format!(
            "{}/repos/{owner}/{repo}/pulls?state=open&sort=updated&direction=desc&per_page=100",
            self.base_url
        );
        let response = self.client.get(&url).send().await?;
        let response = Self::check_status(response).await?;

        let pulls: Vec<RawPull> = response.json().await?;
        Ok(pulls
            .into_iter()
            .map(|p| PullRequest {
                number: p.number,
                title: p.title.unwrap_or_default(),
                head_branch: p.head.branch,
                url: p.html_url,
                created_at: p.created_at,
                updated_at: p.updated_at,
            })
            .collect())
    }

    async fn fetch_diff(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<Vec<FileDiff>, GithubError> {
        let url = format!(
            "{}/repos/{owner}/{repo}/pulls/{number}/files?per_page=100",
            self.base_url
        );
        let response = self.client.get(&url).send().await?;
        let response = Self::check_status(response).await?;

        let files: Vec<RawFile> = response.json().await?;
        Ok(files
            .into_iter()
            .map(|f| FileDiff {
                filename: f.filename,
                status: f.status,
                patch: f.patch,
            })
            .collect())
    }
}
