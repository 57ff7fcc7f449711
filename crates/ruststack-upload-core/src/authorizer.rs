//! Part request authorization.
//!
//! With short-lived credentials configured, parts are presigned locally by a
//! shared [`RequestSigner`] and the control plane's signing callbacks are never
//! invoked. Otherwise every part is authorized by
//! [`ControlPlane::sign_part`].

use std::sync::Arc;

use ruststack_upload_auth::RequestSigner;

use crate::backend::ControlPlane;
use crate::error::UploadError;
use crate::source::UploadSource;
use crate::transport::PresignedRequest;

/// Produces presigned part requests.
#[derive(Clone)]
pub enum PartAuthorizer {
    /// Sign locally from cached short-lived credentials.
    Local(Arc<RequestSigner>),
    /// Ask the control plane for every request.
    ControlPlane(Arc<dyn ControlPlane>),
}

impl std::fmt::Debug for PartAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(signer) => f.debug_tuple("Local").field(signer).finish(),
            Self::ControlPlane(_) => f.write_str("ControlPlane"),
        }
    }
}

impl PartAuthorizer {
    /// Authorize the upload of `part_number`.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Authentication`] if local signing fails, or the
    /// control plane's error.
    pub async fn authorize_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<PresignedRequest, UploadError> {
        match self {
            Self::Local(signer) => Ok(signer
                .presign_part(key, upload_id, part_number)
                .await?
                .into()),
            Self::ControlPlane(control_plane) => {
                control_plane.sign_part(key, upload_id, part_number).await
            }
        }
    }

    /// Authorize a single-request upload of `file`.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Authentication`] if local signing fails, or the
    /// control plane's error.
    pub async fn authorize_object(
        &self,
        file: &dyn UploadSource,
    ) -> Result<PresignedRequest, UploadError> {
        match self {
            Self::Local(signer) => Ok(signer.presign_object(file.name()).await?.into()),
            Self::ControlPlane(control_plane) => control_plane.get_upload_parameters(file).await,
        }
    }

    /// Whether requests are signed locally.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}
