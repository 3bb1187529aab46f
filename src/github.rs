//! GitHub API client: workflow bootstrapping and `repository_dispatch`
//! triggering.
//!
//! The bootstrapper is the interesting part. A target repository may belong
//! to someone who has never heard of this relay, so before the first
//! dispatch we install the ChatOps workflow file ourselves via the contents
//! API. The check-then-create is idempotent: it runs on every deploy
//! request and is a no-op whenever the file already exists.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::GitHubError;
use crate::models::Environment;

const GITHUB_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "chatops-relay";

/// Dispatch event type the bootstrapped workflow subscribes to.
pub const DISPATCH_EVENT: &str = "chatops-deploy";

/// Well-known path of the workflow file inside target repositories.
pub const WORKFLOW_PATH: &str = ".github/workflows/chatops-deploy.yml";

/// GitHub needs a moment before a freshly committed workflow file becomes
/// dispatchable; poll the workflow listing this many times before giving up
/// and dispatching anyway.
const DEFAULT_POLL_ATTEMPTS: u32 = 5;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

const WORKFLOW_TEMPLATE: &str = r#"name: ChatOps Deployment
on:
  repository_dispatch:
    types: [chatops-deploy]
jobs:
  deploy:
    runs-on: ubuntu-latest
    steps:
      - name: Checkout
        uses: actions/checkout@v4
      - name: Deploy
        run: |
          echo "Deploying to ${{ github.event.client_payload.environment }}"
          echo "Deployment ID: ${{ github.event.client_payload.deployment_id }}"
      - name: Report result
        if: always()
        run: |
          curl -sS -X POST "__CALLBACK_URL__/webhook/github" \
            -H "Content-Type: application/json" \
            -H "X-Webhook-Secret: __WEBHOOK_SECRET__" \
            -d "{\"deployment_id\": \"${{ github.event.client_payload.deployment_id }}\", \"status\": \"${{ job.status == 'success' && 'SUCCESS' || 'FAILED' }}\", \"environment\": \"${{ github.event.client_payload.environment }}\", \"run_url\": \"${{ github.server_url }}/${{ github.repository }}/actions/runs/${{ github.run_id }}\"}"
"#;

/// Outcome of an idempotent workflow ensure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    AlreadyPresent,
    Created,
}

/// The remote platform seam the coordinator drives. `GitHubClient` is the
/// real implementation; tests substitute recording fakes.
#[async_trait]
pub trait DeployTarget: Send + Sync {
    /// Idempotently ensure the ChatOps workflow file exists in the repo.
    async fn ensure_workflow(&self, owner: &str, repo: &str)
    -> Result<WorkflowState, GitHubError>;

    /// Wait (bounded) for a just-created workflow to show up in the
    /// workflow listing. Best-effort: gives up and returns after the
    /// attempt budget rather than failing the deploy.
    async fn await_workflow_visible(&self, owner: &str, repo: &str);

    /// Fire a `repository_dispatch` carrying the deployment id as the
    /// correlation token. Confirms acceptance only, never completion.
    async fn trigger_dispatch(
        &self,
        owner: &str,
        repo: &str,
        environment: Environment,
        deployment_id: i64,
    ) -> Result<(), GitHubError>;
}

/// Extract `(owner, repo)` from a repository locator: the last two path
/// segments of `https://github.com/owner/repo[.git]`, or a bare
/// `owner/repo`.
pub fn parse_owner_repo(repo_url: &str) -> Option<(String, String)> {
    let trimmed = repo_url
        .trim()
        .trim_end_matches('/')
        .trim_end_matches(".git");
    let mut segments = trimmed.rsplit('/');
    let repo = segments.next().filter(|s| !s.is_empty())?;
    let owner = segments
        .next()
        .filter(|s| !s.is_empty() && !s.contains(':'))?;
    Some((owner.to_string(), repo.to_string()))
}

pub struct GitHubClient {
    http: reqwest::Client,
    token: String,
    api_base: String,
    callback_base_url: String,
    webhook_secret: String,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl GitHubClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            token: config.github_token.clone(),
            api_base: GITHUB_API_BASE.to_string(),
            callback_base_url: config.callback_base_url.clone(),
            webhook_secret: config.webhook_secret.clone(),
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Point the client at a different API base (tests, GHE).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_poll(mut self, attempts: u32, interval: Duration) -> Self {
        self.poll_attempts = attempts;
        self.poll_interval = interval;
        self
    }

    fn authed(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        rb.bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", USER_AGENT)
    }

    /// The workflow YAML committed into target repositories, parameterized
    /// with this relay's callback URL and webhook secret so the Action
    /// knows where and how to report back.
    fn render_workflow(&self) -> String {
        WORKFLOW_TEMPLATE
            .replace("__CALLBACK_URL__", &self.callback_base_url)
            .replace("__WEBHOOK_SECRET__", &self.webhook_secret)
    }

    async fn workflow_listed(&self, owner: &str, repo: &str) -> Result<bool, GitHubError> {
        #[derive(Deserialize)]
        struct WorkflowList {
            workflows: Vec<WorkflowInfo>,
        }
        #[derive(Deserialize)]
        struct WorkflowInfo {
            path: String,
        }

        let url = format!("{}/repos/{}/{}/actions/workflows", self.api_base, owner, repo);
        let resp = self.authed(self.http.get(&url)).send().await?;
        if !resp.status().is_success() {
            return Err(GitHubError::Rejected {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let list: WorkflowList = resp.json().await?;
        Ok(list.workflows.iter().any(|w| w.path == WORKFLOW_PATH))
    }
}

#[async_trait]
impl DeployTarget for GitHubClient {
    async fn ensure_workflow(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<WorkflowState, GitHubError> {
        let url = format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base, owner, repo, WORKFLOW_PATH
        );

        let resp = self.authed(self.http.get(&url)).send().await?;
        match resp.status().as_u16() {
            200 => {
                debug!(owner, repo, "workflow already present");
                return Ok(WorkflowState::AlreadyPresent);
            }
            // 404 just means the file does not exist yet.
            404 => {}
            status => {
                return Err(GitHubError::Rejected {
                    status,
                    body: resp.text().await.unwrap_or_default(),
                });
            }
        }

        let body = serde_json::json!({
            "message": "chore: add chatops deploy workflow",
            "content": BASE64.encode(self.render_workflow()),
        });
        let resp = self.authed(self.http.put(&url)).json(&body).send().await?;
        if resp.status().is_success() {
            info!(owner, repo, "created chatops workflow");
            Ok(WorkflowState::Created)
        } else {
            Err(GitHubError::Rejected {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            })
        }
    }

    async fn await_workflow_visible(&self, owner: &str, repo: &str) {
        for attempt in 1..=self.poll_attempts {
            match self.workflow_listed(owner, repo).await {
                Ok(true) => {
                    debug!(owner, repo, attempt, "workflow visible");
                    return;
                }
                Ok(false) => {}
                Err(e) => debug!(owner, repo, attempt, "workflow listing failed: {}", e),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        warn!(
            owner,
            repo, "workflow not listed after {} attempts; dispatching anyway", self.poll_attempts
        );
    }

    async fn trigger_dispatch(
        &self,
        owner: &str,
        repo: &str,
        environment: Environment,
        deployment_id: i64,
    ) -> Result<(), GitHubError> {
        let url = format!("{}/repos/{}/{}/dispatches", self.api_base, owner, repo);
        let payload = serde_json::json!({
            "event_type": DISPATCH_EVENT,
            "client_payload": {
                "environment": environment.as_str(),
                "deployment_id": deployment_id.to_string(),
                "triggered_by": "chatops",
            },
        });

        let resp = self.authed(self.http.post(&url)).json(&payload).send().await?;
        // GitHub acknowledges an accepted dispatch with 204 and nothing else.
        if resp.status().as_u16() == 204 {
            Ok(())
        } else {
            Err(GitHubError::Rejected {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            })
        }
    }
}
