use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

use crate::models::{Deployment, DeploymentStatus, Environment};

/// Async-safe handle to the deployment database.
///
/// Wraps `RelayDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<RelayDb>>,
}

impl DbHandle {
    pub fn new(db: RelayDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&RelayDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

/// Result of a status update. `AlreadyTerminal` means the record had
/// reached a terminal state before this update arrived (stale or duplicate
/// callback) and was left untouched.
#[derive(Debug)]
pub enum StatusUpdate {
    Applied(Deployment),
    AlreadyTerminal(Deployment),
}

pub struct RelayDb {
    conn: Connection,
}

impl RelayDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS deployments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    repo_url TEXT NOT NULL,
                    requested_by TEXT NOT NULL,
                    environment TEXT NOT NULL DEFAULT 'dev',
                    status TEXT NOT NULL DEFAULT 'PENDING',
                    run_url TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_deployments_status ON deployments(status);
                ",
            )
            .context("Failed to create deployments table")?;
        Ok(())
    }

    // ── Deployment CRUD ───────────────────────────────────────────────

    pub fn create_deployment(
        &self,
        repo_url: &str,
        requested_by: &str,
        environment: &Environment,
    ) -> Result<Deployment> {
        self.conn
            .execute(
                "INSERT INTO deployments (repo_url, requested_by, environment) VALUES (?1, ?2, ?3)",
                params![repo_url, requested_by, environment.as_str()],
            )
            .context("Failed to insert deployment")?;
        let id = self.conn.last_insert_rowid();
        self.get_deployment(id)?
            .context("Deployment not found after insert")
    }

    pub fn get_deployment(&self, id: i64) -> Result<Option<Deployment>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, repo_url, requested_by, environment, status, run_url, created_at
                 FROM deployments WHERE id = ?1",
            )
            .context("Failed to prepare get_deployment")?;
        let mut rows = stmt
            .query_map(params![id], |row| {
                Ok(DeploymentRow {
                    id: row.get(0)?,
                    repo_url: row.get(1)?,
                    requested_by: row.get(2)?,
                    environment: row.get(3)?,
                    status: row.get(4)?,
                    run_url: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })
            .context("Failed to query deployment")?;
        match rows.next() {
            Some(row) => {
                let r = row.context("Failed to read deployment row")?;
                Ok(Some(r.into_deployment()?))
            }
            None => Ok(None),
        }
    }

    /// Apply a terminal status to a record.
    ///
    /// Records that already reached a terminal state are never re-mutated:
    /// a late or retried callback must not overwrite SUCCESS with a stale
    /// FAILED (or vice versa). `run_url` is only written when provided.
    pub fn update_status(
        &self,
        id: i64,
        status: &DeploymentStatus,
        run_url: Option<&str>,
    ) -> Result<Option<StatusUpdate>> {
        let existing = match self.get_deployment(id)? {
            Some(d) => d,
            None => return Ok(None),
        };
        if existing.status.is_terminal() {
            return Ok(Some(StatusUpdate::AlreadyTerminal(existing)));
        }

        self.conn
            .execute(
                "UPDATE deployments SET status = ?1, run_url = COALESCE(?2, run_url) WHERE id = ?3",
                params![status.as_str(), run_url, id],
            )
            .context("Failed to update deployment status")?;
        let updated = self
            .get_deployment(id)?
            .context("Deployment not found after update")?;
        Ok(Some(StatusUpdate::Applied(updated)))
    }

    /// Most recent deployments, newest first.
    pub fn list_recent(&self, limit: i64) -> Result<Vec<Deployment>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, repo_url, requested_by, environment, status, run_url, created_at
                 FROM deployments ORDER BY id DESC LIMIT ?1",
            )
            .context("Failed to prepare list_recent")?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(DeploymentRow {
                    id: row.get(0)?,
                    repo_url: row.get(1)?,
                    requested_by: row.get(2)?,
                    environment: row.get(3)?,
                    status: row.get(4)?,
                    run_url: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })
            .context("Failed to query deployments")?;
        let mut deployments = Vec::new();
        for row in rows {
            let r = row.context("Failed to read deployment row")?;
            deployments.push(r.into_deployment()?);
        }
        Ok(deployments)
    }
}

// ── Internal row helpers ──────────────────────────────────────────────

/// Intermediate row struct for reading deployments from SQLite before
/// converting environment / status strings into typed values.
struct DeploymentRow {
    id: i64,
    repo_url: String,
    requested_by: String,
    environment: String,
    status: String,
    run_url: Option<String>,
    created_at: String,
}

impl DeploymentRow {
    fn into_deployment(self) -> Result<Deployment> {
        let environment = Environment::from_str(&self.environment)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse deployment environment")?;
        let status = DeploymentStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse deployment status")?;
        Ok(Deployment {
            id: self.id,
            repo_url: self.repo_url,
            requested_by: self.requested_by,
            environment,
            status,
            run_url: self.run_url,
            created_at: self.created_at,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
