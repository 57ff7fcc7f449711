//! Reconciliation of local part bookkeeping with the store.

use tracing::{info, warn};

use super::Shared;
use crate::error::UploadError;
use crate::retry::RetryOutcome;
use crate::state::RemoteUpload;

/// Replace the confirmed parts with the store's listing.
///
/// The store is the source of truth: parts abandoned by a pause may or may not
/// have landed, and only the listing tells. Returns `Ok(false)` if
/// `generation` was superseded before the listing could be applied.
pub(super) async fn reconcile(
    shared: &Shared,
    generation: u64,
    remote: &RemoteUpload,
) -> Result<bool, UploadError> {
    let listed = shared
        .context
        .retry
        .run(
            || !shared.is_current(generation),
            |_| {
                shared
                    .context
                    .control_plane
                    .list_parts(&remote.key, &remote.upload_id)
            },
        )
        .await?;
    let RetryOutcome::Completed(parts) = listed else {
        return Ok(false);
    };

    let reconciled = shared.session.lock().replace_parts(generation, parts);
    let Some(reconciled) = reconciled else {
        return Ok(false);
    };
    if reconciled.ignored > 0 {
        warn!(
            upload_id = %remote.upload_id,
            ignored = reconciled.ignored,
            "Ignoring listed parts outside the file's layout"
        );
    }
    info!(
        file = %shared.id,
        upload_id = %remote.upload_id,
        confirmed = reconciled.confirmed,
        total = shared.layout.total_parts(),
        "Reconciled parts with the store"
    );
    Ok(true)
}
