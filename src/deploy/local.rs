//! Local deployment: check out the PR branch and run the project on an
//! allocated port. Meant for setups without a preview cluster.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use super::{Deployment, DeploymentResolver};

const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct LocalResolver {
    work_dir: PathBuf,
    /// Port for PR #n is `port_base + n`.
    port_base: u16,
    /// Command used to start the checked-out project, run with PORT set.
    start_command: String,
    ready_timeout: Duration,
    children: Mutex<HashMap<i64, Child>>,
    http: reqwest::Client,
}

impl LocalResolver {
    pub fn new(work_dir: impl Into<PathBuf>, port_base: u16, start_command: impl Into<String>) -> Self {
        Self {
            work_dir: work_dir.into(),
            port_base,
            start_command: start_command.into(),
            ready_timeout: Duration::from_secs(60),
            children: Mutex::new(HashMap::new()),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(3))
                .build()
                .unwrap_or_default(),
        }
    }

    fn checkout_dir(&self, pr_number: i64) -> PathBuf {
        self.work_dir.join(format!("pr-{pr_number}"))
    }

    async fn git(args: &[&str], cwd: Option<&PathBuf>) -> Result<()> {
        let mut cmd = Command::new("git");
        cmd.args(args).stdout(Stdio::null()).stderr(Stdio::piped());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let output = cmd.output().await.context("Failed to spawn git")?;
        if !output.status.success() {
            anyhow::bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }

    /// Clone the repository into the PR's checkout dir, or fetch and reset
    /// an existing checkout onto the PR branch.
    async fn checkout(&self, pr_number: i64, repo: &str, branch: &str) -> Result<PathBuf> {
        let dir = self.checkout_dir(pr_number);
        let repo_url = format!("https://github.com/{repo}.git");

        if dir.exists() {
            info!(pr_number, %branch, "Updating existing checkout");
            Self::git(&["fetch", "origin", branch], Some(&dir)).await?;
            Self::git(&["checkout", branch], Some(&dir)).await?;
            Self::git(&["reset", "--hard", &format!("origin/{branch}")], Some(&dir)).await?;
        } else {
            info!(pr_number, %branch, "Cloning repository");
            std::fs::create_dir_all(&self.work_dir)?;
            Self::git(
                &[
                    "clone",
                    "--depth",
                    "1",
                    "--branch",
                    branch,
                    &repo_url,
                    dir.to_string_lossy().as_ref(),
                ],
                None,
            )
            .await?;
        }
        Ok(dir)
    }

    async fn wait_ready(&self, url: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.ready_timeout;
        loop {
            match self.http.get(url).send().await {
                Ok(response) if !response.status().is_server_error() => return Ok(()),
                _ if tokio::time::Instant::now() >= deadline => {
                    anyhow::bail!("Server at {} not ready within {:?}", url, self.ready_timeout)
                }
                _ => tokio::time::sleep(READY_POLL_INTERVAL).await,
            }
        }
    }
}

#[async_trait::async_trait]
impl DeploymentResolver for LocalResolver {
    async fn resolve(&self, pr_number: i64, repo: &str, branch: &str) -> Result<Deployment> {
        let dir = self.checkout(pr_number, repo, branch).await?;
        let port = self.port_base as i64 + pr_number;

        let mut parts = self.start_command.split_whitespace();
        let program = parts
            .next()
            .context("Empty local deploy start command")?;
        let child = Command::new(program)
            .args(parts)
            .current_dir(&dir)
            .env("PORT", port.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start '{}'", self.start_command))?;

        {
            let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(mut old) = children.insert(pr_number, child) {
                let _ = old.start_kill();
            }
        }

        let base_url = format!("http://localhost:{port}");
        self.wait_ready(&base_url).await?;
        info!(pr_number, %base_url, "Local deployment ready");

        Ok(Deployment {
            base_url,
            ephemeral: true,
        })
    }

    async fn cleanup(&self, pr_number: i64) -> Result<()> {
        let child = {
            let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
            children.remove(&pr_number)
        };
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                warn!(pr_number, error = %e, "Failed to kill local deployment process");
            }
            let _ = child.wait().await;
            info!(pr_number, "Local deployment stopped");
        }
        Ok(())
    }
}
