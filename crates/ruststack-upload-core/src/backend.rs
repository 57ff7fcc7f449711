//! Control-plane callbacks supplied by the host application.
//!
//! The engine never talks to the object store's management API directly.
//! Creating, listing, completing and aborting multipart uploads (and, unless
//! requests are signed locally, authorizing each part) goes through a
//! [`ControlPlane`] implemented by the host, typically as calls to its own
//! backend.

use std::sync::Arc;

use async_trait::async_trait;
use ruststack_upload_auth::{AuthError, CredentialProvider, TemporaryCredentials};

use crate::error::UploadError;
use crate::source::UploadSource;
use crate::state::{CompletedUpload, Part, RemoteUpload};
use crate::transport::PresignedRequest;

/// Host-supplied multipart lifecycle operations.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Start a multipart upload for `file`.
    async fn create_multipart_upload(
        &self,
        file: &dyn UploadSource,
    ) -> Result<RemoteUpload, UploadError>;

    /// List the parts the store holds for an upload.
    async fn list_parts(&self, key: &str, upload_id: &str) -> Result<Vec<Part>, UploadError>;

    /// Assemble the object from `parts`, given in ascending part-number order.
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[Part],
    ) -> Result<CompletedUpload, UploadError>;

    /// Abort an upload, discarding its parts.
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<(), UploadError>;

    /// Authorize the upload of one part.
    async fn sign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<PresignedRequest, UploadError>;

    /// Authorize a single-request upload of a whole file.
    async fn get_upload_parameters(
        &self,
        file: &dyn UploadSource,
    ) -> Result<PresignedRequest, UploadError> {
        Err(UploadError::ServerRejection(format!(
            "single-request upload of {} is not supported by this control plane",
            file.name()
        )))
    }

    /// Short-lived credentials for local signing.
    async fn get_short_lived_credentials(&self) -> Result<TemporaryCredentials, UploadError> {
        Err(UploadError::Authentication(
            "short-lived credentials are not available from this control plane".to_owned(),
        ))
    }
}

/// Exposes a control plane's short-lived credentials to a credential cache.
pub struct ControlPlaneCredentials {
    control_plane: Arc<dyn ControlPlane>,
}

impl std::fmt::Debug for ControlPlaneCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlaneCredentials").finish_non_exhaustive()
    }
}

impl ControlPlaneCredentials {
    /// Wrap `control_plane`.
    #[must_use]
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self { control_plane }
    }
}

#[async_trait]
impl CredentialProvider for ControlPlaneCredentials {
    async fn fetch(&self) -> Result<TemporaryCredentials, AuthError> {
        self.control_plane
            .get_short_lived_credentials()
            .await
            .map_err(|e| AuthError::CredentialsUnavailable(e.to_string()))
    }
}
