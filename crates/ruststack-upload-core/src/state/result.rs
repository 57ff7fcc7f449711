//! Session outcomes and the single-assignment result slot.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::UploadError;

/// What the store reported for a completed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedUpload {
    /// Location of the assembled object.
    pub location: String,
    /// Checksum token of the assembled object, if the store returned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_token: Option<String>,
}

/// How a session ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// All parts were assembled into an object.
    Completed(CompletedUpload),
    /// The session was cancelled.
    Cancelled,
}

/// The value a session's result slot resolves to.
pub type SessionResult = Result<UploadOutcome, UploadError>;

/// A slot written at most once, observable by any number of waiters.
#[derive(Debug)]
pub struct ResultSlot {
    tx: watch::Sender<Option<SessionResult>>,
}

impl Default for ResultSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSlot {
    /// An empty slot.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Store `result` unless the slot already holds one. Returns whether it was
    /// stored.
    pub fn fulfil(&self, result: SessionResult) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
            true
        })
    }

    /// Whether the slot holds a result.
    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// The stored result, if any.
    #[must_use]
    pub fn peek(&self) -> Option<SessionResult> {
        self.tx.borrow().clone()
    }

    /// A receiver for [`wait_result`].
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<SessionResult>> {
        self.tx.subscribe()
    }
}

/// Wait until the slot behind `rx` is fulfilled.
///
/// # Errors
///
/// Returns the session's error, or [`UploadError::Internal`] if the slot was
/// dropped unfulfilled.
pub async fn wait_result(mut rx: watch::Receiver<Option<SessionResult>>) -> SessionResult {
    match rx.wait_for(Option::is_some).await {
        Ok(slot) => slot
            .clone()
            .unwrap_or_else(|| Err(UploadError::Internal("empty result slot".to_owned()))),
        Err(_) => Err(UploadError::Internal(
            "session dropped before producing a result".to_owned(),
        )),
    }
}
