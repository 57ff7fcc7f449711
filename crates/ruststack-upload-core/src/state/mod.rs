//! Upload session state.
//!
//! - [`UploadSession`] -- per-file state machine and confirmed-part map
//! - [`Part`] / [`PartLayout`] -- part bookkeeping and byte ranges
//! - [`ResultSlot`] / [`UploadOutcome`] -- single-assignment session result
//!
//! # Thread Safety
//!
//! None of these types lock internally. The session controller keeps each
//! [`UploadSession`] behind a `parking_lot::Mutex` that is never held across an
//! `.await`.

pub(crate) mod part;
pub(crate) mod result;
pub(crate) mod session;

pub use part::{DEFAULT_CHUNK_SIZE, MAX_PARTS, Part, PartLayout};
pub use result::{CompletedUpload, ResultSlot, SessionResult, UploadOutcome, wait_result};
pub use session::{
    AdoptRemote, Reconciled, RemoteUpload, SessionState, UploadProgress, UploadSession,
};
