//! Common error types for tillsync.

use thiserror::Error;

/// Top-level error type for tillsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Local persistence operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Network transport failed before the remote answered.
    #[error("Network error: {0}")]
    Network(String),

    /// Remote store reported a server-side failure.
    #[error("Remote error: {0}")]
    Remote(String),

    /// Operation exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Conflict detected.
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl Error {
    /// Whether a retry of the same operation could plausibly succeed.
    ///
    /// Transport failures, remote-side failures, and timeouts are transient;
    /// everything else reflects a state or input problem that a retry would
    /// reproduce.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Remote(_) | Error::Timeout(_)
        )
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(Error::Network("connection refused".to_string()).is_retryable());
        assert!(Error::Remote("HTTP 503".to_string()).is_retryable());
        assert!(Error::Timeout("probe".to_string()).is_retryable());
    }

    #[test]
    fn test_state_errors_are_not_retryable() {
        assert!(!Error::NotFound("doc".to_string()).is_retryable());
        assert!(!Error::AlreadyExists("doc".to_string()).is_retryable());
        assert!(!Error::InvalidInput("bad".to_string()).is_retryable());
        assert!(!Error::Conflict("stale".to_string()).is_retryable());
        assert!(!Error::Storage("disk".to_string()).is_retryable());
    }
}
