//! End-to-end tests over the full router: slash command in, webhook
//! callback back, state observable through the read API. Outbound GitHub
//! and Slack traffic is stubbed at the trait seams.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use sha2::Sha256;
use tower::ServiceExt;

use chatops_relay::api::AppState;
use chatops_relay::coordinator::Coordinator;
use chatops_relay::db::{DbHandle, RelayDb};
use chatops_relay::errors::GitHubError;
use chatops_relay::github::{DeployTarget, WorkflowState};
use chatops_relay::models::{Deployment, DeploymentStatus, Environment};
use chatops_relay::server::build_router;
use chatops_relay::slack::Notifier;

const WEBHOOK_SECRET: &str = "integration-secret";

#[derive(Default)]
struct StubTarget {
    fail_dispatch: bool,
    dispatched_ids: Mutex<Vec<i64>>,
}

#[async_trait]
impl DeployTarget for StubTarget {
    async fn ensure_workflow(&self, _: &str, _: &str) -> Result<WorkflowState, GitHubError> {
        Ok(WorkflowState::AlreadyPresent)
    }

    async fn await_workflow_visible(&self, _: &str, _: &str) {}

    async fn trigger_dispatch(
        &self,
        _: &str,
        _: &str,
        _: Environment,
        deployment_id: i64,
    ) -> Result<(), GitHubError> {
        self.dispatched_ids.lock().unwrap().push(deployment_id);
        if self.fail_dispatch {
            return Err(GitHubError::Rejected {
                status: 404,
                body: "Not Found".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    notified: Mutex<Vec<(i64, DeploymentStatus)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        deployment: &Deployment,
        status: DeploymentStatus,
        _environment: &str,
        _run_url: Option<&str>,
    ) -> Result<()> {
        self.notified.lock().unwrap().push((deployment.id, status));
        Ok(())
    }
}

struct TestHarness {
    app: Router,
    target: Arc<StubTarget>,
    notifier: Arc<RecordingNotifier>,
}

fn harness_with(target: StubTarget, signing_secret: Option<String>) -> TestHarness {
    let db = DbHandle::new(RelayDb::new_in_memory().unwrap());
    let target = Arc::new(target);
    let notifier = Arc::new(RecordingNotifier::default());
    let coordinator = Coordinator::new(db.clone(), target.clone(), notifier.clone());
    let state = Arc::new(AppState {
        db,
        coordinator,
        webhook_secret: WEBHOOK_SECRET.to_string(),
        signing_secret,
    });
    TestHarness {
        app: build_router(state),
        target,
        notifier,
    }
}

fn harness() -> TestHarness {
    harness_with(StubTarget::default(), None)
}

async fn body_json(body: Body) -> Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn slash_body(command: &str, text: &str, user: &str) -> String {
    serde_urlencoded::to_string([("command", command), ("text", text), ("user_name", user)])
        .unwrap()
}

async fn post_slash(app: &Router, body: &str) -> (StatusCode, Value) {
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/slack")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    (status, body_json(resp.into_body()).await)
}

async fn post_webhook(app: &Router, secret: &str, payload: Value) -> (StatusCode, Value) {
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook/github")
                .header("X-Webhook-Secret", secret)
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    (status, body_json(resp.into_body()).await)
}

async fn get_deployment(app: &Router, id: i64) -> (StatusCode, Value) {
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/deployments/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    (status, body_json(resp.into_body()).await)
}

#[tokio::test]
async fn test_deploy_command_full_happy_path() {
    let h = harness();

    let (status, reply) = post_slash(
        &h.app,
        &slash_body("/deploy", "https://github.com/acme/widgets prod", "alice"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["response_type"], "in_channel");
    assert!(reply.to_string().contains("Deployment Triggered"));

    // The dispatch carried the freshly assigned record id.
    assert_eq!(*h.target.dispatched_ids.lock().unwrap(), vec![1]);

    let (status, dep) = get_deployment(&h.app, 1).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dep["status"], "PENDING");
    assert_eq!(dep["environment"], "prod");
    assert_eq!(dep["repo_url"], "https://github.com/acme/widgets");
    assert!(dep["run_url"].is_null());
}

#[tokio::test]
async fn test_lifecycle_success_callback_persists_and_notifies() {
    let h = harness();
    post_slash(
        &h.app,
        &slash_body("/deploy", "acme/widgets staging", "alice"),
    )
    .await;

    let (status, ack) = post_webhook(
        &h.app,
        WEBHOOK_SECRET,
        json!({
            "deployment_id": "1",
            "status": "SUCCESS",
            "environment": "staging",
            "run_url": "https://github.com/acme/widgets/actions/runs/42"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["ok"], true);

    let (_, dep) = get_deployment(&h.app, 1).await;
    assert_eq!(dep["status"], "SUCCESS");
    assert_eq!(
        dep["run_url"],
        "https://github.com/acme/widgets/actions/runs/42"
    );

    assert_eq!(
        *h.notifier.notified.lock().unwrap(),
        vec![(1, DeploymentStatus::Success)]
    );
}

#[tokio::test]
async fn test_failed_callback_without_run_url() {
    let h = harness();
    post_slash(&h.app, &slash_body("/deploy", "acme/widgets dev", "bob")).await;

    let (status, _) = post_webhook(
        &h.app,
        WEBHOOK_SECRET,
        json!({"deployment_id": 1, "status": "FAILED"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, dep) = get_deployment(&h.app, 1).await;
    assert_eq!(dep["status"], "FAILED");
    assert!(dep["run_url"].is_null());
}

#[tokio::test]
async fn test_duplicate_callback_keeps_first_verdict() {
    let h = harness();
    post_slash(&h.app, &slash_body("/deploy", "acme/widgets prod", "alice")).await;

    post_webhook(
        &h.app,
        WEBHOOK_SECRET,
        json!({"deployment_id": 1, "status": "SUCCESS", "run_url": "https://x/runs/1"}),
    )
    .await;
    let (status, ack) = post_webhook(
        &h.app,
        WEBHOOK_SECRET,
        json!({"deployment_id": 1, "status": "FAILED"}),
    )
    .await;
    // Still acknowledged so the workflow step does not fail on retry.
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["ok"], true);

    let (_, dep) = get_deployment(&h.app, 1).await;
    assert_eq!(dep["status"], "SUCCESS");
    assert_eq!(h.notifier.notified.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_webhook_bad_secret_is_401_and_mutates_nothing() {
    let h = harness();
    post_slash(&h.app, &slash_body("/deploy", "acme/widgets prod", "alice")).await;

    let (status, err) = post_webhook(
        &h.app,
        "wrong-secret",
        json!({"deployment_id": 1, "status": "SUCCESS"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["error"], "Unauthorized");

    let (_, dep) = get_deployment(&h.app, 1).await;
    assert_eq!(dep["status"], "PENDING");
    assert!(h.notifier.notified.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_dispatch_failure_surfaces_and_marks_record() {
    let h = harness_with(
        StubTarget {
            fail_dispatch: true,
            ..Default::default()
        },
        None,
    );

    let (status, reply) = post_slash(&h.app, &slash_body("/deploy", "acme/widgets dev", "alice")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["response_type"], "ephemeral");
    assert!(reply["text"].as_str().unwrap().contains("GitHub trigger failed"));

    let (_, dep) = get_deployment(&h.app, 1).await;
    assert_eq!(dep["status"], "DISPATCH_FAILED");

    // A late callback for a failed dispatch is a no-op.
    let (status, ack) = post_webhook(
        &h.app,
        WEBHOOK_SECRET,
        json!({"deployment_id": 1, "status": "SUCCESS"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["ok"], true);
    let (_, dep) = get_deployment(&h.app, 1).await;
    assert_eq!(dep["status"], "DISPATCH_FAILED");
}

#[tokio::test]
async fn test_invalid_environment_creates_no_record() {
    let h = harness();

    let (status, reply) = post_slash(
        &h.app,
        &slash_body("/deploy", "acme/widgets production", "alice"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["response_type"], "ephemeral");
    assert!(reply["text"].as_str().unwrap().contains("Invalid environment"));

    let (status, _) = get_deployment(&h.app, 1).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(h.target.dispatched_ids.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_deploy_status_command_lists_recent() {
    let h = harness();
    post_slash(&h.app, &slash_body("/deploy", "acme/one dev", "alice")).await;
    post_slash(&h.app, &slash_body("/deploy", "acme/two prod", "bob")).await;

    let (status, reply) = post_slash(&h.app, &slash_body("/deploy-status", "", "alice")).await;
    assert_eq!(status, StatusCode::OK);
    let text = reply.to_string();
    assert!(text.contains("Recent Deployments"));
    assert!(text.contains("acme/two"));
    assert!(text.contains("acme/one"));
}

#[tokio::test]
async fn test_deploy_status_empty() {
    let h = harness();
    let (_, reply) = post_slash(&h.app, &slash_body("/deploy-status", "", "alice")).await;
    assert_eq!(reply["text"], "No deployments found yet.");
}

#[tokio::test]
async fn test_signed_slash_command_accepted_with_valid_signature() {
    let h = harness_with(StubTarget::default(), Some("sig-secret".to_string()));
    let body = slash_body("/deploy", "acme/widgets dev", "alice");

    let timestamp = chrono::Utc::now().timestamp().to_string();
    let mut mac = Hmac::<Sha256>::new_from_slice(b"sig-secret").unwrap();
    mac.update(format!("v0:{}:{}", timestamp, body).as_bytes());
    let signature = format!("v0={}", hex::encode(mac.finalize().into_bytes()));

    let resp = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/slack")
                .header("content-type", "application/x-www-form-urlencoded")
                .header("X-Slack-Request-Timestamp", &timestamp)
                .header("X-Slack-Signature", &signature)
                .body(Body::from(body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Same body, tampered signature.
    let resp = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/slack")
                .header("content-type", "application/x-www-form-urlencoded")
                .header("X-Slack-Request-Timestamp", &timestamp)
                .header("X-Slack-Signature", "v0=deadbeef")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_listing_endpoint_reflects_lifecycle() {
    let h = harness();
    post_slash(&h.app, &slash_body("/deploy", "acme/widgets prod", "alice")).await;
    post_webhook(
        &h.app,
        WEBHOOK_SECRET,
        json!({"deployment_id": 1, "status": "SUCCESS", "run_url": "https://x/runs/7"}),
    )
    .await;

    let resp = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/deployments")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let list = body_json(resp.into_body()).await;
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["status"], "SUCCESS");
    assert_eq!(list[0]["requested_by"], "alice");
}
