//! Deployment lifecycle coordinator.
//!
//! Owns every state transition of a deployment record:
//!
//! ```text
//!              /deploy            webhook callback
//!   (create) ──────────> PENDING ─────────────────> SUCCESS | FAILED
//!                           │
//!                           │ bootstrap/dispatch failure
//!                           v
//!                    DISPATCH_FAILED
//! ```
//!
//! The record is created, with its id, before any outbound call is made:
//! the id is the correlation token handed to GitHub, so the callback can
//! always find its record no matter how the dispatch races against it.
//! All three terminal states are final; stale or duplicate callbacks are
//! acknowledged but never re-mutate a terminal record.

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::db::{DbHandle, StatusUpdate};
use crate::errors::CallbackError;
use crate::github::{DeployTarget, WorkflowState, parse_owner_repo};
use crate::models::{CallbackPayload, Deployment, DeploymentStatus, Environment};
use crate::slack::{self, Notifier};

/// How `/deploy-status` and the dashboard API page their listings.
pub const STATUS_LISTING_LIMIT: i64 = 5;

/// Outcome of a webhook callback. `Ignored` covers every benign no-op:
/// unknown id, unparsable id, already-terminal record. The HTTP layer
/// acknowledges both variants identically so GitHub never retries.
#[derive(Debug)]
pub enum CallbackOutcome {
    Updated(Deployment),
    Ignored,
}

pub struct Coordinator {
    db: DbHandle,
    target: Arc<dyn DeployTarget>,
    notifier: Arc<dyn Notifier>,
}

impl Coordinator {
    pub fn new(db: DbHandle, target: Arc<dyn DeployTarget>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            db,
            target,
            notifier,
        }
    }

    /// Handle `/deploy <repo-url> <environment>`.
    ///
    /// Returns the Slack response payload; validation and dispatch failures
    /// become ephemeral messages rather than HTTP errors. Only
    /// infrastructure failures (the store itself) propagate as `Err`.
    pub async fn handle_deploy(&self, text: &str, user_name: &str) -> Result<Value> {
        let parts: Vec<&str> = text.split_whitespace().collect();
        if parts.len() < 2 {
            return Ok(slack::usage_message());
        }
        let repo_url = parts[0].to_string();
        let env_raw = parts[1].to_lowercase();
        let environment: Environment = match env_raw.parse() {
            Ok(e) => e,
            Err(_) => return Ok(slack::invalid_environment(&env_raw)),
        };
        let Some((owner, repo)) = parse_owner_repo(&repo_url) else {
            return Ok(slack::invalid_repo(&repo_url));
        };

        // The record is the durable anchor for the callback; it must exist
        // before anything leaves this process.
        let deployment = {
            let (url, user) = (repo_url.clone(), user_name.to_string());
            self.db
                .call(move |db| db.create_deployment(&url, &user, &environment))
                .await?
        };
        info!(
            deployment_id = deployment.id,
            repo = %repo_url,
            environment = %environment,
            requested_by = user_name,
            "deployment requested"
        );

        match self.target.ensure_workflow(&owner, &repo).await {
            Ok(WorkflowState::AlreadyPresent) => {}
            Ok(WorkflowState::Created) => {
                // A brand-new workflow file is not dispatchable instantly.
                self.target.await_workflow_visible(&owner, &repo).await;
            }
            Err(e) => {
                warn!(deployment_id = deployment.id, "workflow bootstrap failed: {}", e);
                self.mark_dispatch_failed(deployment.id).await;
                return Ok(slack::bootstrap_failed(&e.to_string()));
            }
        }

        if let Err(e) = self
            .target
            .trigger_dispatch(&owner, &repo, environment, deployment.id)
            .await
        {
            warn!(deployment_id = deployment.id, "dispatch trigger failed: {}", e);
            self.mark_dispatch_failed(deployment.id).await;
            return Ok(slack::trigger_failed(&e.to_string()));
        }

        info!(deployment_id = deployment.id, "dispatch accepted");
        Ok(slack::deploy_ack(&deployment))
    }

    /// Handle `/deploy-status`: the most recent records, newest first.
    pub async fn handle_status(&self) -> Result<Value> {
        let recent = self
            .db
            .call(|db| db.list_recent(STATUS_LISTING_LIMIT))
            .await?;
        Ok(slack::status_listing(&recent))
    }

    /// Handle a verified webhook callback.
    ///
    /// Unknown or stale correlation ids are no-ops, not errors: the caller
    /// still acknowledges so the remote side stops retrying.
    pub async fn handle_callback(
        &self,
        payload: CallbackPayload,
    ) -> Result<CallbackOutcome, CallbackError> {
        let status: DeploymentStatus = payload
            .status
            .parse()
            .ok()
            .filter(|s: &DeploymentStatus| s.is_terminal() && *s != DeploymentStatus::DispatchFailed)
            .ok_or_else(|| CallbackError::InvalidStatus(payload.status.clone()))?;

        let Some(id) = payload.deployment_id.as_i64() else {
            info!("callback with unparsable deployment id; ignoring");
            return Ok(CallbackOutcome::Ignored);
        };

        let run_url = payload.run_url.clone().filter(|u| !u.is_empty());
        let update = {
            let run_url = run_url.clone();
            self.db
                .call(move |db| db.update_status(id, &status, run_url.as_deref()))
                .await?
        };

        match update {
            None => {
                info!(deployment_id = id, "callback for unknown deployment; ignoring");
                Ok(CallbackOutcome::Ignored)
            }
            Some(StatusUpdate::AlreadyTerminal(dep)) => {
                info!(
                    deployment_id = id,
                    status = %dep.status,
                    "stale callback for terminal deployment; ignoring"
                );
                Ok(CallbackOutcome::Ignored)
            }
            Some(StatusUpdate::Applied(dep)) => {
                info!(deployment_id = id, status = %status, "deployment finished");
                let environment = payload
                    .environment
                    .clone()
                    .unwrap_or_else(|| dep.environment.as_str().to_string());
                // Best-effort by contract; a Slack outage must not fail the
                // callback.
                if let Err(e) = self
                    .notifier
                    .notify(&dep, status, &environment, run_url.as_deref())
                    .await
                {
                    warn!(deployment_id = id, "result notification failed: {}", e);
                }
                Ok(CallbackOutcome::Updated(dep))
            }
        }
    }

    async fn mark_dispatch_failed(&self, id: i64) {
        let result = self
            .db
            .call(move |db| db.update_status(id, &DeploymentStatus::DispatchFailed, None))
            .await;
        if let Err(e) = result {
            error!(deployment_id = id, "failed to record dispatch failure: {}", e);
        }
    }
}
