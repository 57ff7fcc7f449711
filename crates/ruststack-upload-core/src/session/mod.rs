//! Upload session controller.
//!
//! [`UploadSessionController`] owns one file's [`UploadSession`] and drives it
//! against the object store. Every `start`, `resume` and `retry` spawns a
//! driver task bound to the generation that transition allocated. The driver
//!
//! 1. creates the remote multipart upload, or reconciles with the store's part
//!    listing when one already exists,
//! 2. uploads the pending parts with bounded concurrency,
//! 3. completes the upload from an ordered snapshot of the confirmed parts.
//!
//! A driver whose generation is superseded (pause, cancel, a newer resume)
//! stops dispatching and its late results are discarded. The session lock is
//! never held across an `.await`.

mod finalize;
mod reconcile;
mod scheduler;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::authorizer::PartAuthorizer;
use crate::backend::ControlPlane;
use crate::error::UploadError;
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::source::UploadSource;
use crate::state::{
    AdoptRemote, CompletedUpload, DEFAULT_CHUNK_SIZE, PartLayout, RemoteUpload, SessionResult,
    SessionState, UploadProgress, UploadSession, wait_result,
};
use crate::transport::PartTransport;
use crate::uploader::Uploader;

/// Default number of parts in flight per session.
pub const DEFAULT_PART_CONCURRENCY: usize = 6;

/// Collaborators and tuning shared by the sessions of an engine.
#[derive(Clone)]
pub struct SessionContext {
    /// Multipart lifecycle callbacks.
    pub control_plane: Arc<dyn ControlPlane>,
    /// Sends part bodies.
    pub transport: Arc<dyn PartTransport>,
    /// Authorizes part requests.
    pub authorizer: PartAuthorizer,
    /// Retry policy for every remote call.
    pub retry: RetryPolicy,
    /// Maximum parts in flight per session.
    pub part_concurrency: usize,
    /// Preferred part size in bytes.
    pub chunk_size: u64,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("authorizer", &self.authorizer)
            .field("retry", &self.retry)
            .field("part_concurrency", &self.part_concurrency)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    /// A context that asks `control_plane` to sign every part, with default
    /// retry, concurrency and chunk size.
    #[must_use]
    pub fn new(control_plane: Arc<dyn ControlPlane>, transport: Arc<dyn PartTransport>) -> Self {
        Self {
            authorizer: PartAuthorizer::ControlPlane(Arc::clone(&control_plane)),
            control_plane,
            transport,
            retry: RetryPolicy::default(),
            part_concurrency: DEFAULT_PART_CONCURRENCY,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Replace the part authorizer.
    #[must_use]
    pub fn with_authorizer(mut self, authorizer: PartAuthorizer) -> Self {
        self.authorizer = authorizer;
        self
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the number of parts in flight per session.
    #[must_use]
    pub fn with_part_concurrency(mut self, part_concurrency: usize) -> Self {
        self.part_concurrency = part_concurrency;
        self
    }

    /// Set the preferred part size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// Drives one file's multipart upload.
///
/// Cloning yields another handle to the same session. Methods that start work
/// (`start`, `resume`, `retry`) spawn tasks and must be called from within a
/// tokio runtime.
#[derive(Clone)]
pub struct UploadSessionController {
    shared: Arc<Shared>,
}

struct Shared {
    id: String,
    source: Arc<dyn UploadSource>,
    context: SessionContext,
    layout: PartLayout,
    session: Mutex<UploadSession>,
    epoch: watch::Sender<u64>,
}

impl fmt::Debug for UploadSessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadSessionController")
            .field("id", &self.shared.id)
            .field("source", &self.shared.source)
            .field("session", &*self.shared.session.lock())
            .finish_non_exhaustive()
    }
}

impl UploadSessionController {
    /// A new idle session for `source`.
    #[must_use]
    pub fn new(id: impl Into<String>, source: Arc<dyn UploadSource>, context: SessionContext) -> Self {
        let layout = PartLayout::new(source.size(), context.chunk_size);
        Self::from_session(id.into(), source, context, UploadSession::new(layout))
    }

    /// A new idle session bound to an upload created earlier, for example by a
    /// previous run of the application. The first `start` reconciles with the
    /// store's part listing instead of creating a new upload.
    #[must_use]
    pub fn attach(
        id: impl Into<String>,
        source: Arc<dyn UploadSource>,
        context: SessionContext,
        remote: RemoteUpload,
    ) -> Self {
        let layout = PartLayout::new(source.size(), context.chunk_size);
        Self::from_session(
            id.into(),
            source,
            context,
            UploadSession::with_remote(layout, remote),
        )
    }

    fn from_session(
        id: String,
        source: Arc<dyn UploadSource>,
        context: SessionContext,
        session: UploadSession,
    ) -> Self {
        let (epoch, _) = watch::channel(session.generation());
        Self {
            shared: Arc::new(Shared {
                id,
                source,
                context,
                layout: *session.layout(),
                session: Mutex::new(session),
                epoch,
            }),
        }
    }

    /// Identifier of this session.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// The file being uploaded.
    #[must_use]
    pub fn source(&self) -> &Arc<dyn UploadSource> {
        &self.shared.source
    }

    /// The part layout.
    #[must_use]
    pub fn layout(&self) -> PartLayout {
        self.shared.layout
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.session.lock().state()
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.session.lock().generation()
    }

    /// Confirmed bytes and parts.
    #[must_use]
    pub fn progress(&self) -> UploadProgress {
        self.shared.session.lock().progress()
    }

    /// The remote upload handle, once created. Persist it to resume the upload
    /// from another process via [`UploadSessionController::attach`].
    #[must_use]
    pub fn remote_upload(&self) -> Option<RemoteUpload> {
        self.shared.session.lock().remote().cloned()
    }

    /// `Idle -> Running`. No-op in any other state. Returns the resulting state.
    pub fn start(&self) -> SessionState {
        match self.shared.transition(UploadSession::start) {
            Some(generation) => {
                info!(file = %self.shared.id, generation, "Upload started");
                self.spawn_driver(generation);
                SessionState::Running
            }
            None => self.state(),
        }
    }

    /// `Running -> Paused`. In-flight parts are abandoned; the store's part
    /// listing decides on resume which of them landed. No-op in any other
    /// state, and once the store has been asked to complete the upload.
    /// Returns the resulting state.
    pub fn pause(&self) -> SessionState {
        match self.shared.transition(UploadSession::pause) {
            Some(generation) => {
                info!(file = %self.shared.id, generation, "Upload paused");
                SessionState::Paused
            }
            None => self.state(),
        }
    }

    /// `Paused -> Running`, reconciling with the store before uploading the
    /// remaining parts. No-op in any other state. Returns the resulting state.
    pub fn resume(&self) -> SessionState {
        match self.shared.transition(UploadSession::resume) {
            Some(generation) => {
                info!(file = %self.shared.id, generation, "Upload resumed");
                self.spawn_driver(generation);
                SessionState::Running
            }
            None => self.state(),
        }
    }

    /// Any non-terminal state `-> Cancelled`. Waiters observe
    /// [`UploadOutcome::Cancelled`](crate::state::UploadOutcome::Cancelled) and
    /// the remote upload, if any, is aborted exactly once (failures to abort
    /// are logged, not returned). No-op once terminal. Returns the resulting
    /// state.
    pub async fn cancel(&self) -> SessionState {
        let cancelled = {
            let mut session = self.shared.session.lock();
            let cancelled = session.cancel();
            if let Some((generation, _)) = &cancelled {
                self.shared.epoch.send_replace(*generation);
            }
            cancelled
        };
        let Some((generation, remote)) = cancelled else {
            return self.state();
        };

        info!(file = %self.shared.id, generation, "Upload cancelled");
        if let Some(remote) = remote {
            self.shared.abort_quietly(&remote).await;
        }
        SessionState::Cancelled
    }

    /// `Failed -> Running` with a fresh result slot. Parts confirmed by the
    /// store are kept. No-op in any other state. Returns the resulting state.
    pub fn retry(&self) -> SessionState {
        if !self.shared.session.lock().rearm() {
            return self.state();
        }
        info!(file = %self.shared.id, "Retrying upload");
        self.start()
    }

    /// `Idle | Failed -> Idle`, forgetting all progress. The forgotten remote
    /// upload is aborted. No-op in any other state. Returns the resulting
    /// state.
    pub async fn reset(&self) -> SessionState {
        let forgotten = self.shared.session.lock().reset();
        match forgotten {
            Some(Some(remote)) => {
                self.shared.abort_quietly(&remote).await;
                SessionState::Idle
            }
            Some(None) => SessionState::Idle,
            None => self.state(),
        }
    }

    /// Wait for the current run's result.
    ///
    /// Resolves once the session completes, fails or is cancelled. A paused or
    /// never-started session keeps the caller waiting.
    ///
    /// # Errors
    ///
    /// Returns the error that failed the session.
    pub async fn wait(&self) -> SessionResult {
        let rx = self.shared.session.lock().result_slot().subscribe();
        wait_result(rx).await
    }

    fn spawn_driver(&self, generation: u64) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { shared.drive(generation).await });
    }
}

#[async_trait]
impl Uploader for UploadSessionController {
    fn id(&self) -> &str {
        UploadSessionController::id(self)
    }

    fn state(&self) -> SessionState {
        UploadSessionController::state(self)
    }

    fn progress(&self) -> UploadProgress {
        UploadSessionController::progress(self)
    }

    async fn upload(&self) -> SessionResult {
        match UploadSessionController::state(self) {
            SessionState::Idle => {
                UploadSessionController::start(self);
            }
            SessionState::Failed => {
                UploadSessionController::retry(self);
            }
            _ => {}
        }
        UploadSessionController::wait(self).await
    }

    async fn wait(&self) -> SessionResult {
        UploadSessionController::wait(self).await
    }

    fn pause(&self) -> SessionState {
        UploadSessionController::pause(self)
    }

    fn resume(&self) -> SessionState {
        UploadSessionController::resume(self)
    }

    async fn cancel(&self) -> SessionState {
        UploadSessionController::cancel(self).await
    }

    async fn reset_state(&self) -> SessionState {
        self.reset().await
    }
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.session.lock().is_current(generation)
    }

    /// Apply a generation-allocating transition and publish the new epoch.
    fn transition(&self, apply: impl FnOnce(&mut UploadSession) -> Option<u64>) -> Option<u64> {
        let mut session = self.session.lock();
        let generation = apply(&mut session)?;
        self.epoch.send_replace(generation);
        Some(generation)
    }

    async fn drive(self: Arc<Self>, generation: u64) {
        match self.run(generation).await {
            Ok(Some(completed)) => {
                let accepted = {
                    let mut session = self.session.lock();
                    let accepted = session.complete(completed.clone());
                    self.epoch.send_replace(session.generation());
                    accepted
                };
                if accepted {
                    info!(
                        file = %self.id,
                        location = %completed.location,
                        "Upload completed"
                    );
                } else {
                    warn!(file = %self.id, "Store completed an upload that was cancelled meanwhile");
                }
            }
            Ok(None) => debug!(file = %self.id, generation, "Upload run superseded"),
            Err(err) => {
                let failed = {
                    let mut session = self.session.lock();
                    let failed = session.fail(generation, err.clone());
                    self.epoch.send_replace(session.generation());
                    failed
                };
                if failed {
                    warn!(file = %self.id, generation, error = %err, "Upload failed");
                } else {
                    debug!(
                        file = %self.id,
                        generation,
                        error = %err,
                        "Discarding failure of a superseded run"
                    );
                }
            }
        }
    }

    /// One run of the driver. `Ok(None)` means the run was superseded.
    async fn run(self: &Arc<Self>, generation: u64) -> Result<Option<CompletedUpload>, UploadError> {
        let Some((remote, existing)) = self.ensure_remote(generation).await? else {
            return Ok(None);
        };
        if existing && !reconcile::reconcile(self, generation, &remote).await? {
            return Ok(None);
        }
        if !scheduler::upload_pending_parts(self, generation, &remote).await? {
            return Ok(None);
        }
        finalize::finalize(self, generation, &remote).await
    }

    /// The session's remote upload, creating it if needed. The flag tells
    /// whether the upload existed before this run.
    async fn ensure_remote(
        &self,
        generation: u64,
    ) -> Result<Option<(RemoteUpload, bool)>, UploadError> {
        let existing = self.session.lock().remote().cloned();
        if let Some(remote) = existing {
            return Ok(Some((remote, true)));
        }

        let created = self
            .context
            .retry
            .run(
                || !self.is_current(generation),
                |_| {
                    self.context
                        .control_plane
                        .create_multipart_upload(self.source.as_ref())
                },
            )
            .await?;
        let RetryOutcome::Completed(remote) = created else {
            return Ok(None);
        };

        let adopted = self.session.lock().adopt_remote(remote.clone());
        match adopted {
            AdoptRemote::Adopted => {
                info!(
                    file = %self.id,
                    upload_id = %remote.upload_id,
                    key = %remote.key,
                    parts = self.layout.total_parts(),
                    "Created multipart upload"
                );
                Ok(Some((remote, false)))
            }
            AdoptRemote::Cancelled => {
                debug!(file = %self.id, upload_id = %remote.upload_id, "Session cancelled during create");
                self.abort_quietly(&remote).await;
                Ok(None)
            }
            AdoptRemote::Duplicate(existing) => {
                debug!(
                    file = %self.id,
                    upload_id = %remote.upload_id,
                    kept = %existing.upload_id,
                    "Dropping duplicate multipart upload"
                );
                self.abort_quietly(&remote).await;
                Ok(Some((existing, true)))
            }
        }
    }

    async fn abort_quietly(&self, remote: &RemoteUpload) {
        match self
            .context
            .control_plane
            .abort_multipart_upload(&remote.key, &remote.upload_id)
            .await
        {
            Ok(()) => info!(file = %self.id, upload_id = %remote.upload_id, "Aborted multipart upload"),
            Err(err) => warn!(
                file = %self.id,
                upload_id = %remote.upload_id,
                error = %err,
                "Failed to abort multipart upload"
            ),
        }
    }
}
