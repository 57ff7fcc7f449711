//! Retry and failure integration tests.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use ruststack_upload_core::retry::{RetryPolicy, RetrySpec};
    use ruststack_upload_core::state::SessionState;
    use ruststack_upload_core::{BytesSource, UploadError, UploadOutcome, UploadSessionController};
    use tokio::time::Instant;

    use crate::{CHUNK, MemoryStore, Op, context, init_tracing, test_data};

    fn transient() -> UploadError {
        UploadError::Transport("connection reset by peer".to_owned())
    }

    fn controller(store: &Arc<MemoryStore>, data: &[u8]) -> UploadSessionController {
        let source = Arc::new(BytesSource::new("video.mp4", data.to_vec()));
        UploadSessionController::new("file-1", source, context(store))
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_retry_transient_part_failures_after_scheduled_delay() {
        init_tracing();
        let store = MemoryStore::new();
        store.fail_next(Op::SendPart(3), transient());
        store.fail_next(Op::SendPart(3), transient());
        let data = test_data(5 * CHUNK as usize);
        let controller = controller(&store, &data);

        let started = Instant::now();
        controller.start();
        let outcome = controller.wait().await.unwrap();
        let elapsed = started.elapsed();

        assert!(matches!(outcome, UploadOutcome::Completed(_)));
        assert_eq!(store.count(Op::SendPart(3)), 3);
        // Delays of [0, 1000] ms: the second retry waits one second.
        assert!(elapsed >= Duration::from_millis(1_000), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1_100), "elapsed {elapsed:?}");
        assert_eq!(store.object("files/video.mp4"), Some(data));
    }

    #[tokio::test]
    async fn test_should_fail_session_on_permanent_part_error_and_retry() {
        init_tracing();
        let store = MemoryStore::new();
        let rejection = UploadError::ServerRejection("EntityTooSmall".to_owned());
        store.fail_next(Op::SendPart(2), rejection.clone());
        let data = test_data(3 * CHUNK as usize);
        let controller = controller(&store, &data);

        controller.start();
        assert_eq!(controller.wait().await, Err(rejection));
        assert_eq!(controller.state(), SessionState::Failed);
        assert_eq!(store.count(Op::SendPart(2)), 1);
        assert!(store.completions().is_empty());

        // Pause and resume do not apply to a failed session.
        assert_eq!(controller.pause(), SessionState::Failed);
        assert_eq!(controller.resume(), SessionState::Failed);

        assert_eq!(controller.retry(), SessionState::Running);
        let outcome = controller.wait().await.unwrap();

        assert!(matches!(outcome, UploadOutcome::Completed(_)));
        assert_eq!(store.count(Op::Create), 1);
        assert_eq!(store.count(Op::ListParts), 1);
        assert_eq!(store.object("files/video.mp4"), Some(data));
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_escalate_exhausted_retries() {
        init_tracing();
        let store = MemoryStore::new();
        for _ in 0..3 {
            store.fail_next(Op::SendPart(1), transient());
        }
        let controller = controller(&store, &test_data(CHUNK as usize));

        controller.start();
        let result = controller.wait().await;

        match result {
            Err(UploadError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(*last, transient());
            }
            other => panic!("expected exhausted retries, got {other:?}"),
        }
        assert_eq!(controller.state(), SessionState::Failed);
        assert_eq!(store.count(Op::SendPart(1)), 3);
    }

    #[tokio::test]
    async fn test_should_retry_transient_control_plane_failures() {
        init_tracing();
        let store = MemoryStore::new();
        store.fail_next(Op::Create, transient());
        store.fail_next(Op::Complete, transient());
        let data = test_data(2 * CHUNK as usize);
        let source = Arc::new(BytesSource::new("video.mp4", data.clone()));
        let context = crate::context(&store)
            .with_retry(RetryPolicy::new(RetrySpec::schedule(vec![0, 0])));
        let controller = UploadSessionController::new("file-1", source, context);

        controller.start();
        controller.wait().await.unwrap();

        assert_eq!(store.count(Op::Create), 2);
        assert_eq!(store.count(Op::Complete), 2);
        assert_eq!(store.open_uploads(), 0);
        assert_eq!(store.object("files/video.mp4"), Some(data));
    }

    #[tokio::test]
    async fn test_should_fail_without_retry_when_upload_is_gone() {
        init_tracing();
        let store = MemoryStore::new();
        store.fail_next(
            Op::ListParts,
            UploadError::ServerRejection("NoSuchUpload".to_owned()),
        );
        let data = test_data(2 * CHUNK as usize);
        let remote = store.seed_upload("files/video.mp4", &data, &[1]);
        let source = Arc::new(BytesSource::new("video.mp4", data));
        let controller = UploadSessionController::attach("file-1", source, context(&store), remote);

        controller.start();
        let result = controller.wait().await;

        assert_eq!(
            result,
            Err(UploadError::ServerRejection("NoSuchUpload".to_owned()))
        );
        assert_eq!(store.count(Op::ListParts), 1);
        assert!(store.sent_parts().is_empty());
    }
}
