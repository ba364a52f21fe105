//! Slack webhook notifier.

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::json;
use std::fmt::Write as _;
use std::time::Duration;

use super::Notifier;
use crate::github::PullRequest;
use crate::scenario::ScenarioResult;

pub struct SlackNotifier {
    client: Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            webhook_url: webhook_url.into(),
        }
    }

    async fn post(&self, text: String) -> Result<()> {
        self.client
            .post(&self.webhook_url)
            .json(&json!({ "text": text }))
            .send()
            .await
            .context("Slack webhook request failed")?
            .error_for_status()
            .context("Slack webhook rejected the message")?;
        Ok(())
    }
}

fn format_report(pr: &PullRequest, results: &[ScenarioResult]) -> String {
    let passed = results.iter().filter(|r| r.success).count();
    let mut text = format!(
        "Preview test report for PR #{} \"{}\" ({}/{} scenarios passed)\n{}\n",
        pr.number,
        pr.title,
        passed,
        results.len(),
        pr.url
    );
    for result in results {
        let mark = if result.success { "PASS" } else { "FAIL" };
        let _ = write!(text, "\n[{mark}] {}", result.scenario_name);
        if let Some(error) = &result.error {
            let _ = write!(text, " - {error}");
        }
        if let Some(validation) = &result.validation {
            let verdict = if validation.is_valid { "looks right" } else { "looks wrong" };
            let _ = write!(
                text,
                " (visual check: {verdict}, confidence {:.0}%)",
                validation.confidence * 100.0
            );
        }
    }
    text
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    async fn report(&self, pr: &PullRequest, results: &[ScenarioResult]) -> Result<()> {
        self.post(format_report(pr, results)).await
    }

    async fn report_error(&self, pr: &PullRequest, message: &str) -> Result<()> {
        self.post(format!(
            "Preview test pipeline failed for PR #{} \"{}\"\n{}\nError: {}",
            pr.number, pr.title, pr.url, message
        ))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Validation;

    fn result(name: &str, success: bool) -> ScenarioResult {
        ScenarioResult {
            scenario_name: name.into(),
            description: String::new(),
            expected_result: String::new(),
            actions: None,
            actions_executed: vec![],
            success,
            error: (!success).then(|| "element not found".to_string()),
            screenshot: None,
            validation: success.then(|| Validation {
                is_valid: true,
                confidence: 0.9,
                issues: vec![],
            }),
        }
    }

    #[test]
    fn report_text_summarizes_scenarios() {
        let pr = PullRequest {
            number: 12,
            title: "Add cart badge".into(),
            head_branch: "preview".into(),
            url: "https://github.com/acme/shop/pull/12".into(),
            created_at: None,
            updated_at: None,
        };
        let text = format_report(&pr, &[result("cart", true), result("login", false)]);
        assert!(text.contains("1/2 scenarios passed"));
        assert!(text.contains("[PASS] cart"));
        assert!(text.contains("[FAIL] login - element not found"));
        assert!(text.contains("confidence 90%"));
    }
}
