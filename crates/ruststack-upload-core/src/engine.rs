//! The upload engine.
//!
//! [`UploadEngine`] is a thin registry of [`Uploader`]s keyed by file ID. It
//! owns what sessions share: the control plane, the part transport, the
//! request signer (and with it the credential cache), and a semaphore capping
//! how many files upload at once. A file holds its slot from admission until
//! its upload resolves, including while it is paused.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use ruststack_upload_auth::RequestSigner;
use tokio::sync::Semaphore;
use tracing::{debug, info};
use uuid::Uuid;

use crate::authorizer::PartAuthorizer;
use crate::backend::{ControlPlane, ControlPlaneCredentials};
use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::retry::RetryPolicy;
use crate::session::{SessionContext, UploadSessionController};
use crate::source::UploadSource;
use crate::state::{RemoteUpload, SessionResult, SessionState, UploadProgress};
use crate::transport::{HttpPartTransport, PartTransport};
use crate::uploader::Uploader;

/// Uploads files through a shared control plane and transport.
pub struct UploadEngine {
    config: UploadConfig,
    context: SessionContext,
    signer: Option<Arc<RequestSigner>>,
    slots: Arc<Semaphore>,
    uploads: DashMap<String, Arc<dyn Uploader>>,
}

impl std::fmt::Debug for UploadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadEngine")
            .field("config", &self.config)
            .field("uploads", &self.uploads.len())
            .field("available_slots", &self.slots.available_permits())
            .finish_non_exhaustive()
    }
}

impl UploadEngine {
    /// Create an engine.
    ///
    /// With [`UploadConfig::local_signing`] set, parts are signed locally from
    /// credentials obtained through
    /// [`ControlPlane::get_short_lived_credentials`], and the control plane's
    /// signing callbacks are never invoked.
    #[must_use]
    pub fn new(
        config: UploadConfig,
        control_plane: Arc<dyn ControlPlane>,
        transport: Arc<dyn PartTransport>,
    ) -> Self {
        let signer = config.local_signing.clone().map(|signer_config| {
            let provider = ControlPlaneCredentials::new(Arc::clone(&control_plane));
            Arc::new(RequestSigner::new(signer_config, Arc::new(provider)))
        });
        let authorizer = match &signer {
            Some(signer) => PartAuthorizer::Local(Arc::clone(signer)),
            None => PartAuthorizer::ControlPlane(Arc::clone(&control_plane)),
        };
        let context = SessionContext::new(control_plane, transport)
            .with_authorizer(authorizer)
            .with_retry(RetryPolicy::new(config.retry.clone()))
            .with_part_concurrency(config.part_concurrency)
            .with_chunk_size(config.chunk_size);

        info!(
            part_concurrency = config.part_concurrency,
            max_concurrent_files = config.max_concurrent_files,
            chunk_size = config.chunk_size,
            local_signing = signer.is_some(),
            "Upload engine created"
        );

        Self {
            slots: Arc::new(Semaphore::new(config.max_concurrent_files.max(1))),
            config,
            context,
            signer,
            uploads: DashMap::new(),
        }
    }

    /// Create an engine sending parts over HTTP.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Internal`] if the HTTP client cannot be built.
    pub fn with_http_transport(
        config: UploadConfig,
        control_plane: Arc<dyn ControlPlane>,
    ) -> Result<Self, UploadError> {
        let transport = HttpPartTransport::new(Duration::from_secs(config.request_timeout_secs))?;
        Ok(Self::new(config, control_plane, Arc::new(transport)))
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// The shared local signer, when local signing is configured.
    #[must_use]
    pub fn signer(&self) -> Option<&Arc<RequestSigner>> {
        self.signer.as_ref()
    }

    /// Register a file and return its ID. The upload starts with
    /// [`UploadEngine::upload`].
    pub fn add_file(&self, source: Arc<dyn UploadSource>) -> String {
        let id = Uuid::new_v4().to_string();
        debug!(id = %id, name = source.name(), size = source.size(), "Adding file");
        let controller = UploadSessionController::new(id.clone(), source, self.context.clone());
        self.uploads.insert(id.clone(), Arc::new(controller));
        id
    }

    /// Register a file whose multipart upload already exists on the store.
    pub fn add_existing(&self, source: Arc<dyn UploadSource>, remote: RemoteUpload) -> String {
        let id = Uuid::new_v4().to_string();
        debug!(id = %id, upload_id = %remote.upload_id, "Attaching file to existing upload");
        let controller =
            UploadSessionController::attach(id.clone(), source, self.context.clone(), remote);
        self.uploads.insert(id.clone(), Arc::new(controller));
        id
    }

    /// Register a custom uploader under its own ID.
    pub fn add_uploader(&self, uploader: Arc<dyn Uploader>) -> String {
        let id = uploader.id().to_owned();
        self.uploads.insert(id.clone(), uploader);
        id
    }

    /// The uploader registered under `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn Uploader>> {
        self.uploads.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// IDs of all registered uploads.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.uploads.iter().map(|entry| entry.key().clone()).collect()
    }

    /// State of the upload registered under `id`.
    #[must_use]
    pub fn state(&self, id: &str) -> Option<SessionState> {
        self.get(id).map(|u| u.state())
    }

    /// Progress of the upload registered under `id`.
    #[must_use]
    pub fn progress(&self, id: &str) -> Option<UploadProgress> {
        self.get(id).map(|u| u.progress())
    }

    /// Upload the file registered under `id` once a slot is free, and wait for
    /// the result.
    ///
    /// A file cancelled while it waits for a slot resolves immediately.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::InvalidState`] for unknown IDs, or the error that
    /// failed the upload.
    pub async fn upload(&self, id: &str) -> SessionResult {
        let uploader = self.lookup(id)?;
        let state = uploader.state();
        if state.is_terminal() {
            return uploader.wait().await;
        }

        let acquire = Arc::clone(&self.slots).acquire_owned();
        let slot = if state == SessionState::Failed {
            // The slot still holds the failure until the retry rearms it.
            acquire.await
        } else {
            tokio::select! {
                slot = acquire => slot,
                result = uploader.wait() => {
                    debug!(id, "Upload resolved while queued");
                    return result;
                }
            }
        };
        let _slot = slot.map_err(|_| UploadError::Internal("upload slots closed".to_owned()))?;
        debug!(id, "Upload admitted");
        uploader.upload().await
    }

    /// Upload every registered file, at most
    /// [`UploadConfig::max_concurrent_files`] at a time.
    pub async fn upload_all(&self) -> Vec<(String, SessionResult)> {
        let ids = self.ids();
        let results = join_all(ids.iter().map(|id| self.upload(id))).await;
        ids.into_iter().zip(results).collect()
    }

    /// Retry a failed upload.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::InvalidState`] for unknown IDs or uploads that
    /// have not failed, or the error that failed the new attempt.
    pub async fn retry(&self, id: &str) -> SessionResult {
        let state = self.lookup(id)?.state();
        if state != SessionState::Failed {
            return Err(UploadError::InvalidState(format!(
                "upload {id} is {state}, only failed uploads can be retried"
            )));
        }
        self.upload(id).await
    }

    /// Pause the upload registered under `id`.
    pub fn pause(&self, id: &str) -> Option<SessionState> {
        self.get(id).map(|u| u.pause())
    }

    /// Resume the upload registered under `id`.
    pub fn resume(&self, id: &str) -> Option<SessionState> {
        self.get(id).map(|u| u.resume())
    }

    /// Cancel the upload registered under `id`.
    pub async fn cancel(&self, id: &str) -> Option<SessionState> {
        let uploader = self.get(id)?;
        Some(uploader.cancel().await)
    }

    /// Cancel and unregister the upload registered under `id`.
    pub async fn remove(&self, id: &str) -> Option<SessionState> {
        let (_, uploader) = self.uploads.remove(id)?;
        let state = uploader.cancel().await;
        debug!(id, "Removed upload");
        Some(state)
    }

    /// Pause every running upload. Returns how many were paused.
    pub fn pause_all(&self) -> usize {
        self.all()
            .iter()
            .filter(|u| u.state() == SessionState::Running)
            .filter(|u| u.pause() == SessionState::Paused)
            .count()
    }

    /// Resume every paused upload. Returns how many were resumed.
    pub fn resume_all(&self) -> usize {
        self.all()
            .iter()
            .filter(|u| u.state() == SessionState::Paused)
            .filter(|u| u.resume() == SessionState::Running)
            .count()
    }

    /// Cancel every upload.
    pub async fn cancel_all(&self) {
        let uploaders = self.all();
        join_all(uploaders.iter().map(|u| u.cancel())).await;
    }

    fn all(&self) -> Vec<Arc<dyn Uploader>> {
        self.uploads
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn lookup(&self, id: &str) -> Result<Arc<dyn Uploader>, UploadError> {
        self.get(id)
            .ok_or_else(|| UploadError::InvalidState(format!("unknown upload {id}")))
    }
}
