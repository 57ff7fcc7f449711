//! Error types for request signing.
//!
//! All signing failures are represented by [`AuthError`]. None of them are
//! transient: a request that cannot be signed locally is never retried.

/// Errors that can occur while signing a request or obtaining credentials.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The configured endpoint URL could not be used.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The access key ID or secret access key is empty.
    #[error("Invalid credentials: access key ID and secret access key must be non-empty")]
    InvalidCredentials,

    /// The requested URL lifetime is outside `1..=604800` seconds.
    #[error("Invalid presigned URL expiry: {0} seconds")]
    InvalidExpiry(u64),

    /// The credential provider failed to produce short-lived credentials.
    #[error("Short-lived credentials unavailable: {0}")]
    CredentialsUnavailable(String),
}
