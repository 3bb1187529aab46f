//! Environment-sourced configuration, snapshotted once at startup and
//! injected into each component at construction. Secrets are never re-read
//! per request.

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Bearer token for the GitHub REST API (contents + dispatches).
    pub github_token: String,
    /// Slack bot token for `chat.postMessage`. Empty means notifications
    /// are disabled (logged and skipped).
    pub slack_bot_token: String,
    /// Channel the notifier posts results to.
    pub slack_channel: String,
    /// Shared secret the bootstrapped workflow sends back in
    /// `X-Webhook-Secret`.
    pub webhook_secret: String,
    /// Slack signing secret. When unset, signed-request verification on
    /// `/slack` is skipped.
    pub signing_secret: Option<String>,
    /// Public base URL of this relay, baked into the workflow template so
    /// the Action knows where to report back. No trailing slash.
    pub callback_base_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Lets tests exercise the
    /// required/optional logic without mutating process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            get(key)
                .filter(|v| !v.is_empty())
                .with_context(|| format!("{} must be set", key))
        };

        Ok(Self {
            github_token: required("GITHUB_TOKEN")?,
            webhook_secret: required("CHATOPS_WEBHOOK_SECRET")?,
            callback_base_url: required("CALLBACK_BASE_URL")?
                .trim_end_matches('/')
                .to_string(),
            slack_bot_token: get("SLACK_BOT_TOKEN").unwrap_or_default(),
            slack_channel: get("SLACK_DEPLOY_CHANNEL")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "#deployments".to_string()),
            signing_secret: get("SLACK_SIGNING_SECRET").filter(|v| !v.is_empty()),
        })
    }
}
