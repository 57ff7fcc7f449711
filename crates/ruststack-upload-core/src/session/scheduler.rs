//! Bounded-concurrency part scheduler.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::debug;

use super::Shared;
use crate::error::UploadError;
use crate::retry::RetryOutcome;
use crate::state::{Part, RemoteUpload};

/// Upload every pending part with at most `part_concurrency` in flight.
///
/// Returns `Ok(true)` once all pending parts are confirmed and `Ok(false)` as
/// soon as `generation` is superseded; in-flight parts are then abandoned. The
/// first part failure of the current run is returned and abandons its
/// siblings.
pub(super) async fn upload_pending_parts(
    shared: &Arc<Shared>,
    generation: u64,
    remote: &RemoteUpload,
) -> Result<bool, UploadError> {
    let mut epoch = shared.epoch.subscribe();
    let mut pending: VecDeque<u32> = {
        let session = shared.session.lock();
        if !session.is_current(generation) {
            return Ok(false);
        }
        session.pending_parts().into()
    };
    if pending.is_empty() {
        debug!(file = %shared.id, "No parts pending");
        return Ok(true);
    }

    let limit = shared.context.part_concurrency.max(1);
    debug!(
        file = %shared.id,
        generation,
        pending = pending.len(),
        limit,
        "Scheduling parts"
    );

    let mut in_flight = JoinSet::new();
    loop {
        while in_flight.len() < limit {
            let Some(part_number) = pending.pop_front() else {
                break;
            };
            // Pause or cancel may land between two dispatches.
            if !shared.is_current(generation) {
                return Ok(false);
            }
            in_flight.spawn(upload_part(
                Arc::clone(shared),
                generation,
                remote.clone(),
                part_number,
            ));
        }

        if in_flight.is_empty() {
            return Ok(shared.is_current(generation));
        }

        tokio::select! {
            joined = in_flight.join_next() => match joined {
                Some(Ok(Ok(()))) | None => {}
                Some(Ok(Err(err))) => {
                    return if shared.is_current(generation) { Err(err) } else { Ok(false) };
                }
                Some(Err(err)) => {
                    return Err(UploadError::Internal(format!("part upload task failed: {err}")));
                }
            },
            changed = epoch.changed() => {
                if changed.is_err() || !shared.is_current(generation) {
                    debug!(
                        file = %shared.id,
                        generation,
                        abandoned = in_flight.len(),
                        "Abandoning in-flight parts"
                    );
                    return Ok(false);
                }
            }
        }
    }
}

/// Read, authorize and send one part, then record it if the run is current.
async fn upload_part(
    shared: Arc<Shared>,
    generation: u64,
    remote: RemoteUpload,
    part_number: u32,
) -> Result<(), UploadError> {
    let range = shared.layout.range(part_number).ok_or_else(|| {
        UploadError::Internal(format!("part {part_number} is outside the layout"))
    })?;
    let body = shared.source.read_range(range).await?;
    let size = body.len() as u64;

    let outcome = shared
        .context
        .retry
        .run(
            || !shared.is_current(generation),
            |attempt| {
                let body = body.clone();
                let (shared, remote) = (&shared, &remote);
                async move {
                    debug!(
                        upload_id = %remote.upload_id,
                        part_number,
                        attempt,
                        "Uploading part"
                    );
                    let request = shared
                        .context
                        .authorizer
                        .authorize_part(&remote.key, &remote.upload_id, part_number)
                        .await?;
                    shared.context.transport.send_part(&request, body).await
                }
            },
        )
        .await?;
    let RetryOutcome::Completed(checksum_token) = outcome else {
        return Ok(());
    };

    let part = Part {
        part_number,
        size,
        checksum_token,
    };
    if shared.session.lock().confirm_part(generation, part) {
        debug!(upload_id = %remote.upload_id, part_number, size, "Part confirmed");
    } else {
        debug!(
            upload_id = %remote.upload_id,
            part_number,
            generation,
            "Discarding part result of a superseded run"
        );
    }
    Ok(())
}
