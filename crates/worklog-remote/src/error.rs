//! Error types for remote calls

use std::time::Duration;

/// Result type for remote operations
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Errors returned by the remote client
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Credentials missing or rejected; the held session has been cleared
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The remote asked the caller to slow down
    #[error("Rate limited by remote{}", retry_hint(.retry_after.as_ref()))]
    RateLimited {
        /// Delay suggested by the `Retry-After` header
        retry_after: Option<Duration>,
    },

    /// The remote answered with a non-success status
    #[error("Remote rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Message extracted from the response
        message: String,
    },

    /// The request never produced a response
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A success response could not be understood
    #[error("Unexpected response: {0}")]
    Decode(String),

    /// Client configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Secret provider failure
    #[error("Secret provider error: {0}")]
    Secrets(String),
}

impl RemoteError {
    /// Whether repeating the same request later may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Transport(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }

    /// Whether the caller must supply fresh credentials
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

fn retry_hint(retry_after: Option<&Duration>) -> String {
    retry_after.map_or_else(String::new, |delay| format!(", retry after {}s", delay.as_secs()))
}
