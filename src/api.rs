use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::coordinator::Coordinator;
use crate::db::DbHandle;
use crate::errors::CallbackError;
use crate::models::CallbackPayload;
use crate::security;
use crate::slack;

/// How many records `GET /api/deployments` returns.
const API_LISTING_LIMIT: i64 = 50;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub coordinator: Coordinator,
    /// Shared secret the workflow's report-back step echoes in
    /// `X-Webhook-Secret`.
    pub webhook_secret: String,
    /// Slack signing secret; when unset, slash commands are accepted
    /// unverified (local development).
    pub signing_secret: Option<String>,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

/// The subset of Slack's form-encoded slash command payload we use.
#[derive(Deserialize)]
pub struct SlashCommand {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub user_name: String,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

impl From<CallbackError> for ApiError {
    fn from(e: CallbackError) -> Self {
        match e {
            CallbackError::InvalidStatus(s) => {
                ApiError::BadRequest(format!("Invalid status: {}", s))
            }
            CallbackError::Internal(e) => ApiError::Internal(e.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/slack", post(slack_command))
        .route("/webhook/github", post(github_webhook))
        .route("/api/deployments", get(list_deployments))
        .route("/api/deployments/{id}", get(get_deployment))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn index() -> &'static str {
    "OK"
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({"status": "running"}))
}

/// Slack slash command entry point.
///
/// Takes the raw body rather than a `Form` extractor: the signature is
/// computed over the exact bytes Slack sent, so verification must happen
/// before any parsing.
async fn slack_command(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(secret) = state.signing_secret.as_deref() {
        let timestamp = header_str(&headers, "X-Slack-Request-Timestamp");
        let signature = header_str(&headers, "X-Slack-Signature");
        let now = chrono::Utc::now().timestamp();
        if !security::verify_slack_signature(secret, timestamp, &body, signature, now) {
            warn!("rejected slash command with bad signature");
            return Err(ApiError::Unauthorized);
        }
    }

    let cmd: SlashCommand = serde_urlencoded::from_str(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid form payload: {}", e)))?;

    let reply = match cmd.command.as_str() {
        "/deploy" => state
            .coordinator
            .handle_deploy(&cmd.text, &cmd.user_name)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?,
        "/deploy-status" => state
            .coordinator
            .handle_status()
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?,
        _ => slack::unknown_command(),
    };
    Ok(Json(reply))
}

/// Completion callback posted by the injected workflow's report-back step.
///
/// The secret check comes before body parsing: an unauthenticated caller
/// learns nothing about what the endpoint accepts. Unknown and stale ids
/// are acknowledged with the same `{"ok": true}` as applied updates so
/// the workflow step never fails on a relay-side no-op.
async fn github_webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, ApiError> {
    let provided = header_str(&headers, "X-Webhook-Secret");
    if !security::verify_webhook_secret(&state.webhook_secret, provided) {
        warn!("rejected webhook callback with bad secret");
        return Err(ApiError::Unauthorized);
    }

    let payload: CallbackPayload = serde_json::from_str(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid callback payload: {}", e)))?;

    state.coordinator.handle_callback(payload).await?;
    Ok(Json(json!({"ok": true})))
}

async fn list_deployments(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let deployments = state
        .db
        .call(|db| db.list_recent(API_LISTING_LIMIT))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(deployments))
}

async fn get_deployment(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deployment = state
        .db
        .call(move |db| db.get_deployment(id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    match deployment {
        Some(d) => Ok(Json(d)),
        None => Err(ApiError::NotFound(format!("Deployment {} not found", id))),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}
