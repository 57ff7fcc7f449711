//! Credential-caching request signer for upload traffic.
//!
//! [`RequestSigner`] turns an object key (plus, for multipart uploads, an upload
//! ID and part number) into a presigned `PUT` URL using cached short-lived
//! credentials. It replaces the backend's per-request signing callbacks; object
//! lifecycle calls (create, list, complete, abort) are not its concern.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::credentials::{CredentialCache, CredentialProvider, TemporaryCredentials};
use crate::error::AuthError;
use crate::presigned::{Endpoint, PresignRequest, PresignedUrl, presign};
use crate::sigv4::SigningParams;

/// Default presigned URL lifetime in seconds.
pub const DEFAULT_EXPIRES_SECS: u64 = 300;

/// Signer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerConfig {
    /// Custom endpoint (e.g. `http://localhost:9000`). When set, path-style
    /// addressing (`/{bucket}/{key}`) is used; otherwise the AWS
    /// virtual-hosted-style endpoint of the credential's bucket and region.
    pub endpoint: Option<String>,
    /// Service name of the credential scope.
    pub service: String,
    /// Presigned URL lifetime in seconds.
    pub expires_in: u64,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            service: "s3".to_owned(),
            expires_in: DEFAULT_EXPIRES_SECS,
        }
    }
}

/// Signs upload requests locally from cached short-lived credentials.
#[derive(Debug)]
pub struct RequestSigner {
    config: SignerConfig,
    cache: CredentialCache,
}

impl RequestSigner {
    /// Create a signer fetching credentials from `provider` on first use.
    #[must_use]
    pub fn new(config: SignerConfig, provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            config,
            cache: CredentialCache::new(provider),
        }
    }

    /// The signer settings.
    #[must_use]
    pub fn config(&self) -> &SignerConfig {
        &self.config
    }

    /// The shared credential cache.
    #[must_use]
    pub fn credential_cache(&self) -> &CredentialCache {
        &self.cache
    }

    /// Presign a `PUT` of one part of a multipart upload.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if credentials cannot be obtained or the
    /// endpoint is invalid.
    pub async fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<PresignedUrl, AuthError> {
        let now = Utc::now();
        let credentials = self.cache.get_at(now).await?;
        self.presign_part_with(&credentials, key, upload_id, part_number, now)
    }

    /// Presign a single-request `PUT` of a whole object.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if credentials cannot be obtained or the
    /// endpoint is invalid.
    pub async fn presign_object(&self, key: &str) -> Result<PresignedUrl, AuthError> {
        let now = Utc::now();
        let credentials = self.cache.get_at(now).await?;
        self.presign_with(&credentials, key, Vec::new(), now)
    }

    /// Presign a part `PUT` with explicit credentials and signing time.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the endpoint or credentials are invalid.
    pub fn presign_part_with(
        &self,
        credentials: &TemporaryCredentials,
        key: &str,
        upload_id: &str,
        part_number: u32,
        time: DateTime<Utc>,
    ) -> Result<PresignedUrl, AuthError> {
        let query = vec![
            ("partNumber".to_owned(), part_number.to_string()),
            ("uploadId".to_owned(), upload_id.to_owned()),
        ];
        let url = self.presign_with(credentials, key, query, time)?;
        debug!(key, upload_id, part_number, "Presigned part upload URL");
        Ok(url)
    }

    fn presign_with(
        &self,
        credentials: &TemporaryCredentials,
        key: &str,
        query: Vec<(String, String)>,
        time: DateTime<Utc>,
    ) -> Result<PresignedUrl, AuthError> {
        let (endpoint, path) = self.resolve(credentials, key)?;
        let request = PresignRequest {
            method: "PUT",
            endpoint: &endpoint,
            path: &path,
            query,
            expires_in: self.config.expires_in,
        };
        let params = SigningParams {
            access_key_id: &credentials.credentials.access_key_id,
            secret_access_key: &credentials.credentials.secret_access_key,
            session_token: credentials.credentials.session_token.as_deref(),
            region: &credentials.region,
            service: &self.config.service,
            time,
        };
        presign(&request, &params)
    }

    /// Resolve the endpoint and raw resource path of `key`. The key is used
    /// verbatim: `/a` and `a` are distinct objects.
    fn resolve(
        &self,
        credentials: &TemporaryCredentials,
        key: &str,
    ) -> Result<(Endpoint, String), AuthError> {
        match &self.config.endpoint {
            Some(url) => Ok((
                Endpoint::parse(url)?,
                format!("/{}/{key}", credentials.bucket),
            )),
            None => Ok((
                Endpoint::virtual_hosted(&credentials.bucket, &credentials.region),
                format!("/{key}"),
            )),
        }
    }
}
