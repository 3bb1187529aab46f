//! Typed errors for the relay's two failure-prone seams: the GitHub API
//! and the webhook callback path. Everything else flows through `anyhow`
//! and is converted to a JSON error at the HTTP boundary.

use thiserror::Error;

/// Errors from outbound GitHub API calls.
///
/// `Unavailable` means the request never got a response (DNS, connect,
/// timeout). `Rejected` means GitHub answered with something other than
/// the expected status; the raw body is kept for diagnostics because
/// dispatch rejections ("No event triggers defined in workflow" and
/// friends) are only explained there.
#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("GitHub API unreachable: {0}")]
    Unavailable(#[from] reqwest::Error),

    #[error("GitHub API rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Errors from handling a webhook callback. A missing record is NOT an
/// error (the callback contract is ack-always), so only genuinely bad
/// input or infrastructure failures appear here.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("invalid terminal status '{0}' (expected SUCCESS or FAILED)")]
    InvalidStatus(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
