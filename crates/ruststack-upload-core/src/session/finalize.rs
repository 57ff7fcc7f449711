//! Completion of the multipart upload.

use tracing::info;

use super::Shared;
use crate::error::UploadError;
use crate::retry::RetryOutcome;
use crate::state::{CompletedUpload, Part, RemoteUpload};

/// Complete the upload from a snapshot of the confirmed parts.
///
/// The snapshot is taken under the session lock when finalization begins and
/// is never modified afterwards. From then on the session cannot be paused. Returns `Ok(None)` if `generation` was
/// superseded before the store was asked to complete.
pub(super) async fn finalize(
    shared: &Shared,
    generation: u64,
    remote: &RemoteUpload,
) -> Result<Option<CompletedUpload>, UploadError> {
    let parts = {
        let mut session = shared.session.lock();
        if !session.is_current(generation) {
            return Ok(None);
        }
        let snapshot =
            completion_snapshot(session.confirmed_parts(), shared.layout.total_parts())?;
        session.begin_finalize(generation);
        snapshot
    };

    info!(
        file = %shared.id,
        upload_id = %remote.upload_id,
        parts = parts.len(),
        "Completing multipart upload"
    );
    let outcome = shared
        .context
        .retry
        .run(
            || !shared.is_current(generation),
            |_| {
                shared.context.control_plane.complete_multipart_upload(
                    &remote.key,
                    &remote.upload_id,
                    &parts,
                )
            },
        )
        .await?;

    match outcome {
        RetryOutcome::Completed(completed) => Ok(Some(completed)),
        RetryOutcome::Cancelled => Ok(None),
    }
}

/// Copy `confirmed` into a list sorted by part number, verifying it holds each
/// of `1..=total_parts` exactly once.
pub(crate) fn completion_snapshot<'a>(
    confirmed: impl IntoIterator<Item = &'a Part>,
    total_parts: u32,
) -> Result<Vec<Part>, UploadError> {
    let mut parts: Vec<Part> = confirmed.into_iter().cloned().collect();
    parts.sort_by_key(|p| p.part_number);

    let complete = parts.len() == total_parts as usize
        && parts
            .iter()
            .zip(1..=total_parts)
            .all(|(part, expected)| part.part_number == expected);
    if complete {
        Ok(parts)
    } else {
        Err(UploadError::IncompleteParts {
            expected: total_parts,
            actual: parts.len(),
        })
    }
}
