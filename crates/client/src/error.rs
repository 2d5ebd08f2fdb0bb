//! Client error types.

use thiserror::Error;

/// Client operation errors.
///
/// The split matters for retry behavior: transient network failures stay
/// pending and retry on the next cycle, authentication failures fail fast
/// until the user re-authenticates, and checksum mismatches discard the
/// transfer and retry once via the normal cycle.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("server error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("state database error: {0}")]
    State(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] driftsync_core::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Whether the operation is worth retrying on a later cycle.
    ///
    /// Authentication failures are not: the token is wrong until the user
    /// fixes it.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Auth(_) => false,
            Self::Api { status, .. } => *status >= 500,
            Self::Network(_) | Self::ChecksumMismatch { .. } | Self::Io(_) => true,
            Self::State(_) | Self::Core(_) | Self::Internal(_) => false,
        }
    }
}

/// Result type for client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;
