//! Error types for the reconciliation engine and its storage contract.

use std::sync::Arc;
use thiserror::Error;

/// Result type for storage adapter operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Hard failures reported by a storage adapter.
///
/// A stale write is *not* an error: adapters report it as
/// [`PushOutcome::Rejected`](crate::PushOutcome::Rejected).
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the failure is transient at the transport level.
        retryable: bool,
    },

    /// The backend answered with something the adapter could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The backend refused the request because of rate limiting.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// A repository, reference or object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The tree listing was truncated by the backend.
    #[error("too many files")]
    TooManyFiles,

    /// The encoded state exceeds the adapter's payload bound.
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Encoded size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// The stored payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Any other adapter-specific failure.
    #[error("{0}")]
    Backend(Arc<dyn std::error::Error + Send + Sync>),
}

impl StorageError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Wraps an arbitrary adapter error.
    pub fn backend(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Arc::new(error))
    }

    /// Returns true if the underlying transport considers the failure transient.
    ///
    /// The engine never retries on its own; this is informational for
    /// whoever reconstructs the store.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Transport { retryable, .. } => *retryable,
            StorageError::RateLimited(_) => true,
            _ => false,
        }
    }
}

/// Terminal failures of a store.
///
/// Once one of these is reported the store issues no further pulls or
/// pushes and should be reconstructed.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// A pull failed.
    #[error("pull failed: {0}")]
    Pull(StorageError),

    /// A push failed with a hard error.
    #[error("push failed: {0}")]
    Push(StorageError),

    /// A completion arrived with no matching operation outstanding.
    #[error("unexpected {0} completion")]
    UnexpectedCompletion(&'static str),

    /// The driver task ended without reporting an error (reducer panic or shutdown).
    #[error("store terminated")]
    Terminated,
}

impl StoreError {
    /// Returns the storage error behind a pull or push failure.
    pub fn storage_error(&self) -> Option<&StorageError> {
        match self {
            StoreError::Pull(e) | StoreError::Push(e) => Some(e),
            _ => None,
        }
    }
}
