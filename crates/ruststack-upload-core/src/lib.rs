//! Resumable multipart upload engine for RustStack.
//!
//! Uploads large files to an S3-compatible object store through the multipart
//! protocol, with pause, resume, cancel and retry per file and a bound on how
//! many files and parts are in flight at once.
//!
//! # Architecture
//!
//! ```text
//! UploadEngine (registry, file slots, shared signer)
//!        |
//!        v
//! UploadSessionController (state machine, generations)
//!        |
//!        +--> ResumeReconciler ------> ControlPlane::list_parts
//!        +--> PartScheduler ---------> PartAuthorizer + PartTransport
//!        +--> CompletionFinalizer ---> ControlPlane::complete_multipart_upload
//!
//! every remote call wrapped by RetryPolicy
//! ```
//!
//! The host application supplies a [`ControlPlane`] (usually calls to its own
//! backend); parts travel over a [`PartTransport`], by default
//! [`HttpPartTransport`].

pub mod authorizer;
pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod retry;
pub mod session;
pub mod source;
pub mod state;
pub mod transport;
pub mod uploader;

pub use backend::ControlPlane;
pub use config::UploadConfig;
pub use engine::UploadEngine;
pub use error::UploadError;
pub use session::{SessionContext, UploadSessionController};
pub use source::{BytesSource, FileSource, UploadSource};
pub use state::{CompletedUpload, Part, RemoteUpload, SessionState, UploadOutcome};
pub use transport::{HttpPartTransport, PartTransport, PresignedRequest};
pub use uploader::Uploader;
