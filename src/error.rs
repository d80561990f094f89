//! Typed errors for the API client and git helpers.
//!
//! Command-level code wraps these in `anyhow` with context; the variants
//! matter where callers branch on them (REST fallback, zero rows, failure
//! log reasons).

use thiserror::Error;

/// Failure of a remote API request after throttling has been handled.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Throttled and the caller asked not to wait.
    #[error("rate limited, resets in {wait_secs}s")]
    RateLimited { wait_secs: u64 },

    #[error("not found or not accessible: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("GraphQL error: {0}")]
    GraphQl(String),

    /// The run was interrupted before an answer arrived.
    #[error("cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid JSON response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Missing repositories produce a zero-valued row instead of a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}

/// Failure of a git operation on one repository.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("no commits found before {0}")]
    NoCommitBefore(String),

    #[error("`git {command}` failed: {reason}")]
    Command { command: String, reason: String },

    #[error("clone failed: {0}")]
    Clone(#[from] git2::Error),
}
