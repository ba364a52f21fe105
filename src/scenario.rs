//! Scenario model -- UI actions, execution results, URL rewriting.
//!
//! Actions are a closed tagged enum so the executor can dispatch
//! exhaustively instead of matching on a free-form string field.

use serde::{Deserialize, Serialize};

/// One browser action inside a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Goto { url: String },
    Click { selector: String },
    Fill { selector: String, value: String },
    Wait { seconds: u64 },
    Screenshot { name: String },
    SetViewport { width: u32, height: u32 },
}

/// An ordered list of UI actions plus an expected-outcome description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub description: String,
    pub actions: Vec<Action>,
    pub expected_result: String,
}

impl Scenario {
    /// The minimal fallback scenario: a basic reachability check of the
    /// deployment. Substituted when scenario generation fails for a
    /// non-configuration reason.
    pub fn default_reachability(target_url: &str) -> Self {
        Self {
            name: "Homepage reachability".to_string(),
            description: "Verify the deployed preview loads at all".to_string(),
            actions: vec![
                Action::Goto {
                    url: target_url.to_string(),
                },
                Action::Wait { seconds: 2 },
                Action::Screenshot {
                    name: "homepage".to_string(),
                },
            ],
            expected_result: "The homepage renders without errors".to_string(),
        }
    }

    /// Rewrite goto actions so they target the resolved deployment.
    ///
    /// - relative paths are appended to the deployment URL
    /// - schemeless values are treated as paths
    /// - absolute URLs pointing at the configured base domain (or the
    ///   `example.com` placeholder the generator sometimes emits) have their
    ///   origin replaced
    /// - unrelated external domains are left untouched
    pub fn rewrite_for_deployment(&mut self, deployment_url: &str, base_domain: Option<&str>) {
        let deployment_url = deployment_url.trim_end_matches('/');
        for action in &mut self.actions {
            if let Action::Goto { url } = action {
                *url = rewrite_goto_url(url, deployment_url, base_domain);
            }
        }
    }
}

fn rewrite_goto_url(url: &str, deployment_url: &str, base_domain: Option<&str>) -> String {
    if let Some(path) = url.strip_prefix('/') {
        return format!("{deployment_url}/{path}");
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return format!("{deployment_url}/{url}");
    }

    let host = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    let (host, path) = match host.split_once('/') {
        Some((h, p)) => (h, format!("/{p}")),
        None => (host, String::new()),
    };

    let matches_base = base_domain.is_some_and(|d| host == d || host.ends_with(&format!(".{d}")));
    if matches_base || host == "example.com" || host.ends_with(".example.com") {
        return format!("{deployment_url}{path}");
    }

    url.to_string()
}

/// Record of one executed action: the action plus its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedAction {
    pub action: Action,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

/// Visual validator verdict for a screenshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    pub is_valid: bool,
    pub confidence: f64,
    #[serde(default)]
    pub issues: Vec<String>,
}

/// The outcome of executing one scenario. This is what gets persisted
/// in a run's result payload, one entry per scenario, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_name: String,
    pub description: String,
    pub expected_result: String,
    /// Original action list, kept so reruns never have to guess.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<Action>>,
    pub actions_executed: Vec<ExecutedAction>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Base64 PNG of the final state, when the scenario got that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<Validation>,
}
