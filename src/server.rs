use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::{self, AppState};
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::db::{DbHandle, RelayDb};
use crate::github::GitHubClient;
use crate::slack::SlackNotifier;

/// Configuration for the relay server.
pub struct ServerConfig {
    pub port: u16,
    pub db_path: std::path::PathBuf,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: std::path::PathBuf::from("chatops.db"),
            dev_mode: false,
        }
    }
}

/// Build the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the relay server.
pub async fn start_server(server_config: ServerConfig, config: Config) -> Result<()> {
    if let Some(parent) = server_config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }

    let db = DbHandle::new(
        RelayDb::new(&server_config.db_path).context("Failed to initialize relay database")?,
    );
    let github = GitHubClient::new(&config).context("Failed to build GitHub client")?;
    let notifier = SlackNotifier::new(&config).context("Failed to build Slack client")?;
    let coordinator = Coordinator::new(db.clone(), Arc::new(github), Arc::new(notifier));

    let state = Arc::new(AppState {
        db,
        coordinator,
        webhook_secret: config.webhook_secret.clone(),
        signing_secret: config.signing_secret.clone(),
    });

    let mut app = build_router(state);

    if server_config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if server_config.dev_mode {
        "127.0.0.1"
    } else {
        "0.0.0.0"
    };
    let addr = format!("{}:{}", host, server_config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "chatops relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GitHubError;
    use crate::github::{DeployTarget, WorkflowState};
    use crate::models::{Deployment, DeploymentStatus, Environment};
    use crate::slack::Notifier;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    struct StubTarget;

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
            _: i64,
        ) -> Result<(), GitHubError> {
            Ok(())
        }
    }

    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn notify(
            &self,
            _: &Deployment,
            _: DeploymentStatus,
            _: &str,
            _: Option<&str>,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn test_router() -> Router {
        let db = DbHandle::new(RelayDb::new_in_memory().unwrap());
        let coordinator =
            Coordinator::new(db.clone(), Arc::new(StubTarget), Arc::new(NullNotifier));
        let state = Arc::new(AppState {
            db,
            coordinator,
            webhook_secret: "secret".to_string(),
            signing_secret: None,
        });
        build_router(state)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let app = test_router();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_routes_mounted() {
        let app = test_router();
        let req = Request::builder()
            .uri("/api/deployments")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = test_router();
        let req = Request::builder()
            .uri("/nope")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.db_path, std::path::PathBuf::from("chatops.db"));
        assert!(!config.dev_mode);
    }
}
