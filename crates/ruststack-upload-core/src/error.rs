//! Upload error types.
//!
//! Defines [`UploadError`], the error taxonomy shared by every component of the
//! engine. Only [`UploadError::Transport`] is transient: the retry policy absorbs
//! it locally, every other variant ends the session on first occurrence.
//!
//! Errors are `Clone` because a session's outcome is observed by any number of
//! waiters.
//!
//! # Usage
//!
//! ```
//! use ruststack_upload_core::error::UploadError;
//!
//! let err = UploadError::Transport("connection reset".to_owned());
//! assert!(err.is_retryable());
//! assert!(!UploadError::ServerRejection("NoSuchUpload".to_owned()).is_retryable());
//! ```

use ruststack_upload_auth::AuthError;

/// Upload engine error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    /// Connection failure or timeout. Retried by the retry policy.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Signing or credential failure. Never retried.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The store rejected the request (stale upload ID, part order, expired
    /// credentials, ...). Never retried.
    #[error("Request rejected by the object store: {0}")]
    ServerRejection(String),

    /// A transient error persisted through every allowed attempt.
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error of the final attempt.
        last: Box<UploadError>,
    },

    /// The file content could not be read.
    #[error("Failed to read upload source: {0}")]
    Source(String),

    /// Finalization was attempted without every part confirmed.
    #[error("Part list is incomplete: expected {expected} parts, have {actual}")]
    IncompleteParts {
        /// Number of parts in the upload.
        expected: u32,
        /// Number of confirmed parts.
        actual: usize,
    },

    /// The operation is not valid in the session's current state.
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Unexpected internal failure (e.g. a panicked task).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    /// Whether the retry policy may try the failed operation again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<AuthError> for UploadError {
    fn from(err: AuthError) -> Self {
        Self::Authentication(err.to_string())
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        Self::Source(err.to_string())
    }
}

/// Convenience result type for upload operations.
pub type UploadResult<T> = Result<T, UploadError>;
