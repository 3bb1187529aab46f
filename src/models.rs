use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Deployment target environment. The only values the relay will accept
/// from a slash command; anything else is rejected before a record exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Staging => "staging",
            Self::Prod => "prod",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Self::Dev),
            "staging" => Ok(Self::Staging),
            "prod" => Ok(Self::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

/// Lifecycle state of a deployment record.
///
/// `Pending` is the only non-terminal state: a record moves to
/// `DispatchFailed` when the trigger never reaches GitHub, or to
/// `Success`/`Failed` when the workflow callback arrives. Terminal states
/// never transition again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Pending,
    DispatchFailed,
    Success,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::DispatchFailed => "DISPATCH_FAILED",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "DISPATCH_FAILED" => Ok(Self::DispatchFailed),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Invalid deployment status: {}", s)),
        }
    }
}

/// A single deployment request. The `id` is assigned by SQLite on insert
/// and doubles as the correlation token round-tripped through the
/// `repository_dispatch` payload and back in the webhook callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: i64,
    pub repo_url: String,
    pub requested_by: String,
    pub environment: Environment,
    pub status: DeploymentStatus,
    pub run_url: Option<String>,
    pub created_at: String,
}

/// GitHub Actions workflows send `deployment_id` back as whatever type the
/// shell interpolation produced, so accept both JSON forms.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DeploymentId {
    Int(i64),
    Str(String),
}

impl DeploymentId {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Str(s) => s.trim().parse().ok(),
        }
    }
}

/// Body of the `POST /webhook/github` callback.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackPayload {
    pub deployment_id: DeploymentId,
    pub status: String,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub run_url: Option<String>,
}
