//! Per-file upload session state.
//!
//! [`UploadSession`] is the state machine of one file's upload. It is a plain
//! data structure: the controller keeps it behind a lock and drives the
//! network side. Every mutation of the confirmed-part map is tagged with the
//! generation the work was dispatched under and is rejected unless the session
//! is still running that generation.
//!
//! ```text
//! Idle --start--> Running --pause--> Paused --resume--> Running
//!                    |                                     |
//!                    +--finalize ok--> Completed           +--error--> Failed --retry--> Idle
//! any non-terminal --cancel--> Cancelled
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::part::{Part, PartLayout};
use super::result::{CompletedUpload, ResultSlot, UploadOutcome};
use crate::error::UploadError;

/// The remote handle of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUpload {
    /// Upload ID assigned by the store.
    pub upload_id: String,
    /// Key of the object being assembled.
    pub key: String,
}

/// Lifecycle state of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// Created, not started.
    Idle,
    /// Parts are being uploaded or the upload is being completed.
    Running,
    /// Suspended by the user; no new work is dispatched.
    Paused,
    /// Cancelled by the user. Terminal.
    Cancelled,
    /// The object was assembled. Terminal.
    Completed,
    /// Stopped by an error; may be retried.
    Failed,
}

impl SessionState {
    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What happened to a freshly created remote upload offered to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdoptRemote {
    /// The session now owns the upload.
    Adopted,
    /// The session was cancelled meanwhile; the offered upload must be aborted.
    Cancelled,
    /// The session already owns another upload; the offered one must be
    /// aborted and the returned one used instead.
    Duplicate(RemoteUpload),
}

/// Confirmed-part bookkeeping after a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    /// Parts now confirmed.
    pub confirmed: usize,
    /// Listed parts dropped for being outside the layout.
    pub ignored: usize,
}

/// Progress snapshot of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    /// Bytes in confirmed parts.
    pub bytes_confirmed: u64,
    /// Size of the file.
    pub bytes_total: u64,
    /// Number of confirmed parts.
    pub parts_confirmed: u32,
    /// Number of parts in the layout.
    pub parts_total: u32,
}

/// State of one file's multipart upload.
#[derive(Debug)]
pub struct UploadSession {
    state: SessionState,
    generation: u64,
    layout: PartLayout,
    remote: Option<RemoteUpload>,
    confirmed: BTreeMap<u32, Part>,
    result: ResultSlot,
    finalizing: bool,
}

impl UploadSession {
    /// A new idle session with no remote upload.
    #[must_use]
    pub fn new(layout: PartLayout) -> Self {
        Self {
            state: SessionState::Idle,
            generation: 0,
            layout,
            remote: None,
            confirmed: BTreeMap::new(),
            result: ResultSlot::new(),
            finalizing: false,
        }
    }

    /// A new idle session bound to an existing remote upload.
    #[must_use]
    pub fn with_remote(layout: PartLayout, remote: RemoteUpload) -> Self {
        let mut session = Self::new(layout);
        session.remote = Some(remote);
        session
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The part layout.
    #[must_use]
    pub fn layout(&self) -> &PartLayout {
        &self.layout
    }

    /// The remote upload, once created or attached.
    #[must_use]
    pub fn remote(&self) -> Option<&RemoteUpload> {
        self.remote.as_ref()
    }

    /// The result slot of the current run.
    #[must_use]
    pub fn result_slot(&self) -> &ResultSlot {
        &self.result
    }

    /// Confirmed parts in ascending part-number order.
    pub fn confirmed_parts(&self) -> impl Iterator<Item = &Part> {
        self.confirmed.values()
    }

    /// Whether work dispatched under `generation` may still mutate the session.
    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        self.state == SessionState::Running && self.generation == generation
    }

    /// Whether the running generation has asked the store to complete.
    #[must_use]
    pub fn is_finalizing(&self) -> bool {
        self.finalizing
    }

    /// Part numbers not yet confirmed, ascending.
    #[must_use]
    pub fn pending_parts(&self) -> Vec<u32> {
        self.layout
            .part_numbers()
            .filter(|n| !self.confirmed.contains_key(n))
            .collect()
    }

    /// Progress snapshot.
    #[must_use]
    pub fn progress(&self) -> UploadProgress {
        UploadProgress {
            bytes_confirmed: self.confirmed.values().map(|p| p.size).sum(),
            bytes_total: self.layout.file_size(),
            parts_confirmed: u32::try_from(self.confirmed.len()).unwrap_or(u32::MAX),
            parts_total: self.layout.total_parts(),
        }
    }

    /// `Idle -> Running`. Returns the new generation.
    pub fn start(&mut self) -> Option<u64> {
        (self.state == SessionState::Idle).then(|| self.enter(SessionState::Running))
    }

    /// `Running -> Paused`. Returns the new generation.
    ///
    /// Refused once finalization has begun: the store may assemble the object
    /// at any moment, after which the upload can no longer be listed.
    pub fn pause(&mut self) -> Option<u64> {
        (self.state == SessionState::Running && !self.finalizing)
            .then(|| self.enter(SessionState::Paused))
    }

    /// `Paused -> Running`. Returns the new generation.
    pub fn resume(&mut self) -> Option<u64> {
        (self.state == SessionState::Paused).then(|| self.enter(SessionState::Running))
    }

    /// Any non-terminal state `-> Cancelled`.
    ///
    /// Resolves the result slot with [`UploadOutcome::Cancelled`] unless it
    /// already holds a result, and hands out the remote upload (at most once)
    /// so the caller can abort it. Returns `None` if already terminal.
    pub fn cancel(&mut self) -> Option<(u64, Option<RemoteUpload>)> {
        if self.state.is_terminal() {
            return None;
        }
        let generation = self.enter(SessionState::Cancelled);
        self.result.fulfil(Ok(UploadOutcome::Cancelled));
        Some((generation, self.remote.take()))
    }

    /// `Running | Paused -> Completed`, resolving the result slot.
    ///
    /// A completion that lands after the session was paused is still accepted:
    /// the store has already assembled the object.
    pub fn complete(&mut self, upload: CompletedUpload) -> bool {
        if !matches!(self.state, SessionState::Running | SessionState::Paused) {
            return false;
        }
        self.enter(SessionState::Completed);
        self.result.fulfil(Ok(UploadOutcome::Completed(upload)));
        true
    }

    /// `Running -> Failed` for the run of `generation`, resolving the result
    /// slot with `error`.
    pub fn fail(&mut self, generation: u64, error: UploadError) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.enter(SessionState::Failed);
        self.result.fulfil(Err(error));
        true
    }

    /// `Failed -> Idle` with a fresh result slot. The remote upload and the
    /// confirmed parts are kept; the next run reconciles them with the store.
    pub fn rearm(&mut self) -> bool {
        if self.state != SessionState::Failed {
            return false;
        }
        self.enter(SessionState::Idle);
        self.result = ResultSlot::new();
        true
    }

    /// `Idle | Failed -> Idle`, forgetting the remote upload and all parts.
    /// Returns the forgotten remote upload.
    ///
    /// An unfulfilled slot is kept so that callers already waiting observe the
    /// next run.
    pub fn reset(&mut self) -> Option<Option<RemoteUpload>> {
        if !matches!(self.state, SessionState::Idle | SessionState::Failed) {
            return None;
        }
        self.enter(SessionState::Idle);
        self.confirmed.clear();
        if self.result.is_fulfilled() {
            self.result = ResultSlot::new();
        }
        Some(self.remote.take())
    }

    /// Mark the run of `generation` as completing the upload, if it is still
    /// current. Pausing is refused until the session leaves `Running`.
    pub fn begin_finalize(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.finalizing = true;
        true
    }

    /// Offer a freshly created remote upload to the session.
    pub fn adopt_remote(&mut self, remote: RemoteUpload) -> AdoptRemote {
        if self.state == SessionState::Cancelled {
            return AdoptRemote::Cancelled;
        }
        match &self.remote {
            Some(existing) => AdoptRemote::Duplicate(existing.clone()),
            None => {
                self.remote = Some(remote);
                AdoptRemote::Adopted
            }
        }
    }

    /// Record a part confirmed by the store, if `generation` is still current
    /// and the part belongs to the layout.
    pub fn confirm_part(&mut self, generation: u64, part: Part) -> bool {
        if !self.is_current(generation) || !self.layout.contains(part.part_number) {
            return false;
        }
        self.confirmed.insert(part.part_number, part);
        true
    }

    /// Replace the confirmed parts with the store's listing, if `generation` is
    /// still current. Parts outside the layout are ignored.
    pub fn replace_parts(
        &mut self,
        generation: u64,
        listed: impl IntoIterator<Item = Part>,
    ) -> Option<Reconciled> {
        if !self.is_current(generation) {
            return None;
        }
        let mut ignored = 0;
        let mut confirmed = BTreeMap::new();
        for part in listed {
            if self.layout.contains(part.part_number) {
                confirmed.insert(part.part_number, part);
            } else {
                ignored += 1;
            }
        }
        self.confirmed = confirmed;
        Some(Reconciled {
            confirmed: self.confirmed.len(),
            ignored,
        })
    }

    fn enter(&mut self, state: SessionState) -> u64 {
        self.state = state;
        self.finalizing = false;
        self.generation += 1;
        self.generation
    }
}
