//! GitHub API error types.
//!
//! Rate limiting is kept as its own variant because the caller reacts
//! differently: a rate-limited subscription pass is aborted with guidance
//! to configure a token, while generic failures just fail the pass.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GithubError {
    /// HTTP 429, or 403 with the rate-limit budget exhausted.
    #[error("GitHub rate limit exceeded{}", reset_hint(.reset_at))]
    RateLimited {
        /// Epoch seconds at which the limit resets, from `x-ratelimit-reset`.
        reset_at: Option<i64>,
    },

    /// Authentication or permission failure (401, 403 without rate-limit
    /// headers, 404 on a private repository).
    #[error("GitHub authentication failed (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    /// Any other non-success status.
    #[error("GitHub API error (HTTP {status}): {message}")]
    Status { status: u16, message: String },

    /// Network-level failure (timeout, DNS, connection reset).
    #[error("GitHub request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode GitHub response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl GithubError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GithubError::RateLimited { .. })
    }
}

fn reset_hint(reset_at: &Option<i64>) -> String {
    match reset_at {
        Some(epoch) => format!(" (resets at epoch {epoch})"),
        None => String::new(),
    }
}
