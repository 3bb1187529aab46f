//! Slack surface: slash-command response payloads and the best-effort
//! result notifier.
//!
//! Builders return raw `serde_json::Value` Block Kit payloads; Slack's
//! block schema is too loose to be worth typing out, and the handlers
//! only ever pass these through as the HTTP response body.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::Config;
use crate::models::{Deployment, DeploymentStatus};

const SLACK_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

/// Outbound result delivery seam. Contractually best-effort: the
/// coordinator logs and swallows any error this returns.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        deployment: &Deployment,
        status: DeploymentStatus,
        environment: &str,
        run_url: Option<&str>,
    ) -> Result<()>;
}

// ── Slash-command response builders ───────────────────────────────────

pub fn usage_message() -> Value {
    json!({
        "response_type": "ephemeral",
        "text": "⚠️ Usage: `/deploy <github-repo-url> <environment>`\nEnvironments: `dev`, `staging`, `prod`"
    })
}

pub fn invalid_environment(environment: &str) -> Value {
    json!({
        "response_type": "ephemeral",
        "text": format!("❌ Invalid environment `{}`. Choose from: `dev`, `staging`, `prod`", environment)
    })
}

pub fn invalid_repo(repo_url: &str) -> Value {
    json!({
        "response_type": "ephemeral",
        "text": format!("❌ Could not parse `owner/repo` from `{}`.", repo_url)
    })
}

pub fn bootstrap_failed(error: &str) -> Value {
    json!({
        "response_type": "ephemeral",
        "text": format!("❌ Workflow setup failed: {}", error)
    })
}

pub fn trigger_failed(error: &str) -> Value {
    json!({
        "response_type": "ephemeral",
        "text": format!("❌ GitHub trigger failed: {}", error)
    })
}

pub fn unknown_command() -> Value {
    json!({"text": "Unknown command."})
}

/// In-channel acknowledgment posted the moment the dispatch is accepted.
/// Slack enforces a 3-second response budget, so this is all the requester
/// sees until the callback lands.
pub fn deploy_ack(deployment: &Deployment) -> Value {
    json!({
        "response_type": "in_channel",
        "blocks": [
            {
                "type": "header",
                "text": {"type": "plain_text", "text": "🚀 Deployment Triggered!"}
            },
            {
                "type": "section",
                "fields": [
                    {"type": "mrkdwn", "text": format!("*Repo:*\n{}", deployment.repo_url)},
                    {"type": "mrkdwn", "text": format!("*Environment:*\n`{}`", deployment.environment)},
                    {"type": "mrkdwn", "text": format!("*Triggered by:*\n@{}", deployment.requested_by)},
                    {"type": "mrkdwn", "text": format!("*Deployment ID:*\n`{}`", deployment.id)}
                ]
            },
            {
                "type": "section",
                "text": {"type": "mrkdwn", "text": "⏳ Status: `DEPLOYING` — I'll post here when it finishes."}
            }
        ]
    })
}

fn status_icon(status: DeploymentStatus) -> &'static str {
    match status {
        DeploymentStatus::Success => "✅",
        DeploymentStatus::Failed => "❌",
        DeploymentStatus::Pending => "⏳",
        DeploymentStatus::DispatchFailed => "🚫",
    }
}

/// `/deploy-status` listing, newest first.
pub fn status_listing(deployments: &[Deployment]) -> Value {
    if deployments.is_empty() {
        return json!({"response_type": "ephemeral", "text": "No deployments found yet."});
    }

    let mut blocks = vec![json!({
        "type": "header",
        "text": {"type": "plain_text", "text": "📋 Recent Deployments"}
    })];
    for dep in deployments {
        blocks.push(json!({
            "type": "section",
            "fields": [
                {"type": "mrkdwn", "text": format!("*Repo:*\n{}", dep.repo_url)},
                {"type": "mrkdwn", "text": format!("*Env:*\n`{}`", dep.environment)},
                {"type": "mrkdwn", "text": format!("*Status:*\n{} `{}`", status_icon(dep.status), dep.status)},
                {"type": "mrkdwn", "text": format!("*By:*\n@{}", dep.requested_by)}
            ]
        }));
        blocks.push(json!({"type": "divider"}));
    }

    json!({"response_type": "ephemeral", "blocks": blocks})
}

/// `chat.postMessage` body for a terminal result.
pub fn build_result_message(
    channel: &str,
    deployment: &Deployment,
    status: DeploymentStatus,
    environment: &str,
    run_url: Option<&str>,
) -> Value {
    let icon = if status == DeploymentStatus::Success { "✅" } else { "❌" };
    let color = if status == DeploymentStatus::Success { "#36a64f" } else { "#ff0000" };

    let mut blocks = vec![json!({
        "type": "section",
        "text": {
            "type": "mrkdwn",
            "text": format!(
                "{} *Deployment {}*\n*Repo:* {}\n*Environment:* `{}`\n*Triggered by:* @{}\n*Deployment ID:* `{}`",
                icon, status, deployment.repo_url, environment, deployment.requested_by, deployment.id
            )
        }
    })];
    if let Some(url) = run_url.filter(|u| !u.is_empty()) {
        blocks.push(json!({
            "type": "actions",
            "elements": [
                {
                    "type": "button",
                    "text": {"type": "plain_text", "text": "🔗 View GitHub Run"},
                    "url": url
                }
            ]
        }));
    }

    json!({
        "channel": channel,
        "attachments": [{"color": color, "blocks": blocks}]
    })
}

// ── Notifier implementation ───────────────────────────────────────────

pub struct SlackNotifier {
    http: reqwest::Client,
    token: String,
    channel: String,
    api_url: String,
}

impl SlackNotifier {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            token: config.slack_bot_token.clone(),
            channel: config.slack_channel.clone(),
            api_url: SLACK_POST_MESSAGE_URL.to_string(),
        })
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(
        &self,
        deployment: &Deployment,
        status: DeploymentStatus,
        environment: &str,
        run_url: Option<&str>,
    ) -> Result<()> {
        if self.token.is_empty() {
            bail!("SLACK_BOT_TOKEN not configured; skipping notification");
        }

        let payload = build_result_message(&self.channel, deployment, status, environment, run_url);
        let resp = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .context("Failed to reach Slack")?
            .error_for_status()
            .context("Slack API returned error status")?;

        // Slack reports application errors inside a 200 body.
        let body: Value = resp.json().await.context("Failed to parse Slack response")?;
        if body["ok"] != json!(true) {
            bail!(
                "Slack rejected the message: {}",
                body["error"].as_str().unwrap_or("unknown error")
            );
        }
        debug!(deployment_id = deployment.id, "posted result to Slack");
        Ok(())
    }
}
