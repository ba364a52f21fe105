//! Daemon configuration: TOML file with environment-variable overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub polling: PollingConfig,
    pub deploy: DeployConfig,
    pub services: ServicesConfig,
    pub github: GithubConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_minutes: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DeployConfig {
    /// "local" starts checked-out PR branches as processes; anything else
    /// disables the local tier.
    pub mode: Option<String>,
    /// Fallback URL when no other tier applies.
    pub default_url: Option<String>,
    /// Domain used for goto-URL normalization of generated scenarios.
    pub base_domain: Option<String>,
    pub work_dir: Option<String>,
    pub port_base: Option<u16>,
    /// Command run inside the checkout to start the project (PORT is set).
    pub start_command: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServicesConfig {
    pub generator_url: Option<String>,
    pub executor_url: Option<String>,
    pub validator_url: Option<String>,
    pub slack_webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GithubConfig {
    /// Fallback token for subscriptions without a credential reference.
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/prwatch.db".to_string(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_minutes: 5 }
    }
}

impl Config {
    /// Load from a TOML file if it exists, then apply env overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) if Path::new(path).exists() => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {path}"))?;
                toml::from_str(&raw).with_context(|| format!("Invalid config file {path}"))?
            }
            Some(path) => {
                anyhow::bail!("Config file {} not found", path);
            }
            None => Config::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            if !token.is_empty() {
                self.github.token = Some(token);
            }
        }
        if let Ok(url) = std::env::var("SLACK_WEBHOOK_URL") {
            if !url.is_empty() {
                self.services.slack_webhook_url = Some(url);
            }
        }
        if let Ok(minutes) = std::env::var("PRWATCH_POLL_INTERVAL_MINS") {
            if let Ok(minutes) = minutes.parse() {
                self.polling.interval_minutes = minutes;
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.polling.interval_minutes.max(1) * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.polling.interval_minutes, 5);
        assert_eq!(config.poll_interval(), Duration::from_secs(300));
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [polling]
            interval_minutes = 10

            [deploy]
            mode = "local"
            port_base = 9000
            default_url = "https://staging.acme.dev"
            "#,
        )
        .unwrap();
        assert_eq!(config.polling.interval_minutes, 10);
        assert_eq!(config.deploy.mode.as_deref(), Some("local"));
        assert_eq!(config.deploy.port_base, Some(9000));
        assert_eq!(config.server.bind, "0.0.0.0:8080");
    }

    #[test]
    fn interval_is_clamped_to_a_minute() {
        let config: Config = toml::from_str("[polling]\ninterval_minutes = 0\n").unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(60));
    }
}
