//! Error taxonomy for the PollClaw workspace.

use thiserror::Error;

/// Workspace-wide result alias.
pub type Result<T> = std::result::Result<T, PollClawError>;

/// All errors the engine and its collaborators can surface.
///
/// The taxonomy follows the run semantics: `Config` and `Storage` abort a
/// whole orchestration pass, `Channel` is a per-item failure isolated and
/// retried by the batch processor.
#[derive(Debug, Error)]
pub enum PollClawError {
    /// Missing or invalid process configuration (fatal for a pass).
    #[error("config error: {0}")]
    Config(String),

    /// Poll store unreachable or query/update failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Outbound messaging API failure (per-item, retryable).
    #[error("channel error: {0}")]
    Channel(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PollClawError {
    /// Whether the batch processor should bother retrying this error.
    /// Channel failures are usually transient (rate limits, timeouts);
    /// the rest will fail identically on the next attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PollClawError::Channel(_))
    }
}
