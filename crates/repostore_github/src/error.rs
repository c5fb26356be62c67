//! Error types for the GitHub adapter.

use repostore_engine::StorageError;
use thiserror::Error;

/// Result type for GitHub operations.
pub type GithubResult<T> = Result<T, GithubError>;

/// Errors that can occur while talking to GitHub.
#[derive(Error, Debug, Clone)]
pub enum GithubError {
    /// GitHub answered with a non-success status.
    #[error("fetching GitHub API failed: {message} (status {status})")]
    Api {
        /// HTTP status code.
        status: u16,
        /// `message` from the response body, or a generic description.
        message: String,
    },

    /// The request never produced a response.
    #[error("fetching GitHub API failed: {0}")]
    Transport(String),

    /// A response or stored payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A request or payload could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// GitHub truncated a tree listing.
    #[error("too many files")]
    TooManyFiles,

    /// GitHub refused a reference update although the branch had not moved.
    #[error("reference update refused: {0}")]
    RefUpdateRefused(String),

    /// The configuration cannot address a state file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The encoded state exceeds the configured bound.
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Encoded size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },
}

impl GithubError {
    /// Returns the HTTP status of an API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            GithubError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true for a 404 answer.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    fn is_rate_limit(status: u16, message: &str) -> bool {
        status == 429 || (status == 403 && message.to_ascii_lowercase().contains("rate limit"))
    }
}

impl From<GithubError> for StorageError {
    fn from(error: GithubError) -> Self {
        match error {
            GithubError::Api { status, message }
                if GithubError::is_rate_limit(status, &message) =>
            {
                StorageError::RateLimited(message)
            }
            GithubError::Api {
                status: 401 | 403,
                message,
            } => StorageError::AuthenticationFailed(message),
            GithubError::Api {
                status: 404,
                message,
            } => StorageError::NotFound(message),
            GithubError::Api { status, message } => {
                StorageError::Protocol(format!("status {status}: {message}"))
            }
            GithubError::Transport(message) => StorageError::transport_retryable(message),
            GithubError::Decode(message) | GithubError::Encode(message) => {
                StorageError::Codec(message)
            }
            GithubError::TooManyFiles => StorageError::TooManyFiles,
            error @ (GithubError::RefUpdateRefused(_) | GithubError::InvalidConfig(_)) => {
                StorageError::Protocol(error.to_string())
            }
            GithubError::PayloadTooLarge { size, limit } => {
                StorageError::PayloadTooLarge { size, limit }
            }
        }
    }
}
