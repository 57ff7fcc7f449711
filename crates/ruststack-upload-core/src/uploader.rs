//! The capability set every upload backend offers the engine.

use async_trait::async_trait;

use crate::state::{SessionResult, SessionState, UploadProgress};

/// A resumable upload of one file.
///
/// Implemented by [`UploadSessionController`](crate::session::UploadSessionController)
/// for the multipart protocol; other protocols plug into the
/// [`UploadEngine`](crate::engine::UploadEngine) by implementing it too.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Identifier of the upload.
    fn id(&self) -> &str;

    /// Current lifecycle state.
    fn state(&self) -> SessionState;

    /// Confirmed bytes and parts.
    fn progress(&self) -> UploadProgress;

    /// Start (or, after a failure, retry) the upload and wait for its result.
    /// Waits for the running attempt if one is already in progress.
    async fn upload(&self) -> SessionResult;

    /// Wait for the result of the current attempt without starting one.
    async fn wait(&self) -> SessionResult;

    /// Suspend the upload.
    fn pause(&self) -> SessionState;

    /// Continue a suspended upload.
    fn resume(&self) -> SessionState;

    /// Cancel the upload and discard its remote state.
    async fn cancel(&self) -> SessionState;

    /// Forget all progress of an idle or failed upload.
    async fn reset_state(&self) -> SessionState;
}
