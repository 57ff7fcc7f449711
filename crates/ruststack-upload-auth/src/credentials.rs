//! Short-lived credentials, credential providers, and the refresh cache.
//!
//! Upload signing uses temporary credentials obtained from the host application
//! (typically an STS `GetFederationToken` / `AssumeRole` result relayed by the
//! backend). [`CredentialCache`] keeps one set of credentials per engine
//! instance and refreshes it shortly before it expires.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AuthError;

/// Credentials are refreshed once they are within this window of expiring.
pub const REFRESH_BUFFER: Duration = Duration::minutes(5);

/// AWS access key material, in the field layout returned by STS.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Credentials {
    /// The access key ID.
    pub access_key_id: String,
    /// The secret access key.
    pub secret_access_key: String,
    /// The session token of temporary credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    /// When the credentials stop being valid.
    pub expiration: DateTime<Utc>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Credentials together with the bucket and region they are scoped to.
///
/// This is the payload the host's `getShortLivedCredentials` callback returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporaryCredentials {
    /// The key material.
    pub credentials: Credentials,
    /// Bucket that uploads are written to.
    pub bucket: String,
    /// Region of the bucket.
    pub region: String,
}

impl TemporaryCredentials {
    /// Whether these credentials must be refreshed before signing at `now`.
    ///
    /// True once `now` is within [`REFRESH_BUFFER`] of the expiration.
    #[must_use]
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now >= self.credentials.expiration - REFRESH_BUFFER
    }
}

/// Source of short-lived credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Fetch a fresh set of credentials.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CredentialsUnavailable`] if no credentials can be obtained.
    async fn fetch(&self) -> Result<TemporaryCredentials, AuthError>;
}

/// A provider that always returns the same credentials.
///
/// Suitable for testing and for long-lived development keys.
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    credentials: TemporaryCredentials,
}

impl StaticCredentialProvider {
    /// Create a provider returning `credentials`.
    #[must_use]
    pub fn new(credentials: TemporaryCredentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn fetch(&self) -> Result<TemporaryCredentials, AuthError> {
        Ok(self.credentials.clone())
    }
}

/// Caches credentials from a [`CredentialProvider`].
///
/// Credentials are fetched on first use and reused until they need a refresh
/// (see [`TemporaryCredentials::needs_refresh`]). Refreshes are single-flight:
/// concurrent callers that find the cache stale wait for one fetch instead of
/// each issuing their own.
pub struct CredentialCache {
    provider: Arc<dyn CredentialProvider>,
    cached: RwLock<Option<Arc<TemporaryCredentials>>>,
    refresh: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("cached", &self.cached.read().is_some())
            .finish_non_exhaustive()
    }
}

impl CredentialCache {
    /// Create an empty cache backed by `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            provider,
            cached: RwLock::new(None),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    /// Credentials valid for signing now.
    ///
    /// # Errors
    ///
    /// Propagates the provider's error when a refresh is needed and fails.
    pub async fn get(&self) -> Result<Arc<TemporaryCredentials>, AuthError> {
        self.get_at(Utc::now()).await
    }

    /// Credentials valid for signing at `now`.
    ///
    /// # Errors
    ///
    /// Propagates the provider's error when a refresh is needed and fails.
    pub async fn get_at(&self, now: DateTime<Utc>) -> Result<Arc<TemporaryCredentials>, AuthError> {
        if let Some(fresh) = self.current(now) {
            return Ok(fresh);
        }

        let _guard = self.refresh.lock().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(fresh) = self.current(now) {
            return Ok(fresh);
        }

        let fetched = Arc::new(self.provider.fetch().await?);
        debug!(
            access_key_id = %fetched.credentials.access_key_id,
            expiration = %fetched.credentials.expiration,
            bucket = %fetched.bucket,
            region = %fetched.region,
            "Refreshed short-lived credentials"
        );
        *self.cached.write() = Some(Arc::clone(&fetched));
        Ok(fetched)
    }

    /// Drop the cached credentials so the next call fetches new ones.
    pub fn invalidate(&self) {
        *self.cached.write() = None;
    }

    fn current(&self, now: DateTime<Utc>) -> Option<Arc<TemporaryCredentials>> {
        self.cached
            .read()
            .as_ref()
            .filter(|c| !c.needs_refresh(now))
            .cloned()
    }
}
