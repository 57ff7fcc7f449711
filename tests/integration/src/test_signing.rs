//! Local signing integration tests.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ruststack_upload_auth::SignerConfig;
    use ruststack_upload_core::{BytesSource, UploadConfig, UploadEngine, UploadOutcome};

    use crate::{CHUNK, MemoryStore, Op, init_tracing, test_data};

    fn config() -> UploadConfig {
        UploadConfig::builder()
            .chunk_size(CHUNK)
            .part_concurrency(2)
            .build()
    }

    #[tokio::test]
    async fn test_should_sign_parts_locally_without_sign_callbacks() {
        init_tracing();
        let store = MemoryStore::with_credentials();
        let mut config = config();
        config.local_signing = Some(SignerConfig::default());
        let engine = UploadEngine::new(config, store.clone(), store.clone());
        assert!(engine.signer().is_some());

        let data = test_data(4 * CHUNK as usize);
        let a = engine.add_file(Arc::new(BytesSource::new("a.bin", data.clone())));
        let b = engine.add_file(Arc::new(BytesSource::new("b.bin", data.clone())));

        let results = engine.upload_all().await;
        assert_eq!(results.len(), 2);
        for (_, result) in &results {
            assert!(matches!(result, Ok(UploadOutcome::Completed(_))));
        }

        let signed_calls = store
            .calls()
            .into_iter()
            .filter(|op| matches!(op, Op::SignPart(_)))
            .count();
        assert_eq!(signed_calls, 0);
        // One credential fetch serves every part of both files.
        assert_eq!(store.count(Op::Credentials), 1);

        let urls = store.sent_urls();
        assert_eq!(urls.len(), 8);
        for url in &urls {
            assert!(url.starts_with("https://uploads.s3.us-east-1.amazonaws.com/files/"));
            assert!(url.contains("X-Amz-Credential=ASIAMEMORYSTORE%2F"));
            assert!(url.contains("X-Amz-Security-Token=memory-session"));
            assert!(url.contains("X-Amz-Signature="));
        }
        assert_eq!(store.object("files/a.bin"), Some(data.clone()));
        assert_eq!(store.object("files/b.bin"), Some(data));
        assert!(engine.state(&a).is_some() && engine.state(&b).is_some());
    }

    #[tokio::test]
    async fn test_should_ask_control_plane_to_sign_each_part() {
        init_tracing();
        let store = MemoryStore::with_credentials();
        let engine = UploadEngine::new(config(), store.clone(), store.clone());
        assert!(engine.signer().is_none());

        let id = engine.add_file(Arc::new(BytesSource::new("a.bin", test_data(3 * CHUNK as usize))));
        engine.upload(&id).await.unwrap();

        let mut signed: Vec<u32> = store
            .calls()
            .into_iter()
            .filter_map(|op| match op {
                Op::SignPart(n) => Some(n),
                _ => None,
            })
            .collect();
        signed.sort_unstable();
        assert_eq!(signed, vec![1, 2, 3]);
        assert_eq!(store.count(Op::Credentials), 0);
        assert!(store.sent_urls().iter().all(|url| url.starts_with("memory://uploads/")));
    }

    #[tokio::test]
    async fn test_should_fail_upload_when_credentials_are_unavailable() {
        init_tracing();
        let store = MemoryStore::new();
        let mut config = config();
        config.local_signing = Some(SignerConfig::default());
        let engine = UploadEngine::new(config, store.clone(), store.clone());

        let id = engine.add_file(Arc::new(BytesSource::new("a.bin", test_data(CHUNK as usize))));
        let result = engine.upload(&id).await;

        assert!(
            matches!(result, Err(ruststack_upload_core::UploadError::Authentication(_))),
            "unexpected result: {result:?}"
        );
        assert!(store.sent_urls().is_empty());
    }
}
