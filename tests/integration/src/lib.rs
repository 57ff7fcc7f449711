//! Integration tests for the RustStack upload engine.
//!
//! The tests drive real sessions and engines against [`MemoryStore`], an
//! in-memory object store that plays both the host's control plane and the
//! part transport. It records every call, can fail or hold chosen operations,
//! and assembles completed objects so their bytes can be checked.
//!
//! Run them with:
//! ```text
//! cargo test -p ruststack-upload-integration
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use ruststack_upload_auth::{Credentials, TemporaryCredentials};
use ruststack_upload_core::retry::{RetryPolicy, RetrySpec};
use ruststack_upload_core::{
    CompletedUpload, ControlPlane, Part, PartTransport, PresignedRequest, RemoteUpload,
    SessionContext, UploadError, UploadSource,
};
use tokio::sync::watch;

static INIT: Once = Once::new();

/// Initialize tracing (once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Part size used by the tests.
pub const CHUNK: u64 = 8;

/// Deterministic test content of `len` bytes.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn test_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// A store operation, for fault injection, holds and the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// `create_multipart_upload`.
    Create,
    /// `list_parts`.
    ListParts,
    /// `complete_multipart_upload`.
    Complete,
    /// `abort_multipart_upload`.
    Abort,
    /// `sign_part`.
    SignPart(u32),
    /// A part body arriving at the store.
    SendPart(u32),
    /// `get_short_lived_credentials`.
    Credentials,
}

/// When a held operation stops to wait for [`MemoryStore::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hold {
    /// Before the store applies the operation.
    BeforeApply,
    /// After the store applied it, before the response reaches the client.
    AfterApply,
}

#[derive(Debug, Clone)]
struct StoredPart {
    etag: String,
    data: Bytes,
}

#[derive(Debug)]
struct StoredUpload {
    key: String,
    parts: BTreeMap<u32, StoredPart>,
}

#[derive(Debug, Default)]
struct StoreState {
    uploads: HashMap<String, StoredUpload>,
    objects: HashMap<String, Vec<u8>>,
}

/// In-memory multipart object store.
#[derive(Debug)]
pub struct MemoryStore {
    bucket: String,
    state: Mutex<StoreState>,
    calls: Mutex<Vec<(Op, String)>>,
    faults: Mutex<HashMap<Op, VecDeque<UploadError>>>,
    holds: Mutex<HashMap<Op, Hold>>,
    gate: watch::Sender<bool>,
    send_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    credentials: Option<TemporaryCredentials>,
}

impl MemoryStore {
    /// An empty store for bucket `uploads`.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// An empty store that also hands out short-lived credentials.
    #[must_use]
    pub fn with_credentials() -> Arc<Self> {
        let credentials = TemporaryCredentials {
            credentials: Credentials {
                access_key_id: "ASIAMEMORYSTORE".to_owned(),
                secret_access_key: "memory-secret".to_owned(),
                session_token: Some("memory-session".to_owned()),
                expiration: chrono::Utc::now() + chrono::Duration::hours(1),
            },
            bucket: "uploads".to_owned(),
            region: "us-east-1".to_owned(),
        };
        Arc::new(Self::build(Some(credentials)))
    }

    fn build(credentials: Option<TemporaryCredentials>) -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            bucket: "uploads".to_owned(),
            state: Mutex::new(StoreState::default()),
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(HashMap::new()),
            holds: Mutex::new(HashMap::new()),
            gate,
            send_delay: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            credentials,
        }
    }

    /// Fail the next call of `op` with `error` (queued per operation).
    pub fn fail_next(&self, op: Op, error: UploadError) {
        self.faults.lock().entry(op).or_default().push_back(error);
    }

    /// Drop every queued failure.
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Make calls of `op` wait for [`MemoryStore::release`].
    pub fn hold(&self, op: Op, mode: Hold) {
        self.gate.send_replace(false);
        self.holds.lock().insert(op, mode);
    }

    /// Let every held call proceed and stop holding.
    pub fn release(&self) {
        self.holds.lock().clear();
        self.gate.send_replace(true);
    }

    /// Delay every part body by `delay`.
    pub fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock() = delay;
    }

    /// Create an upload holding `parts` of `data`, as a previous run would
    /// have left it.
    #[allow(clippy::cast_possible_truncation)]
    pub fn seed_upload(&self, key: &str, data: &[u8], parts: &[u32]) -> RemoteUpload {
        let upload_id = uuid::Uuid::new_v4().to_string();
        let stored = parts
            .iter()
            .map(|&n| {
                let start = usize::try_from(u64::from(n - 1) * CHUNK).unwrap_or(usize::MAX);
                let end = (start + CHUNK as usize).min(data.len());
                let part = StoredPart {
                    etag: format!("\"seed-{n}\""),
                    data: Bytes::copy_from_slice(&data[start..end]),
                };
                (n, part)
            })
            .collect();
        self.state.lock().uploads.insert(
            upload_id.clone(),
            StoredUpload {
                key: key.to_owned(),
                parts: stored,
            },
        );
        RemoteUpload {
            upload_id,
            key: key.to_owned(),
        }
    }

    /// Calls received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Op> {
        self.calls.lock().iter().map(|(op, _)| *op).collect()
    }

    /// Number of calls of `op`.
    #[must_use]
    pub fn count(&self, op: Op) -> usize {
        self.calls.lock().iter().filter(|(o, _)| *o == op).count()
    }

    /// Part numbers whose bodies arrived, in arrival order.
    #[must_use]
    pub fn sent_parts(&self) -> Vec<u32> {
        self.calls
            .lock()
            .iter()
            .filter_map(|(op, _)| match op {
                Op::SendPart(n) => Some(*n),
                _ => None,
            })
            .collect()
    }

    /// URLs part bodies were sent to, in arrival order.
    #[must_use]
    pub fn sent_urls(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|(op, _)| matches!(op, Op::SendPart(_)))
            .map(|(_, detail)| detail.clone())
            .collect()
    }

    /// Part lists of every completion request.
    #[must_use]
    pub fn completions(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|(op, _)| *op == Op::Complete)
            .map(|(_, detail)| detail.clone())
            .collect()
    }

    /// Bytes of the assembled object `key`.
    #[must_use]
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().objects.get(key).cloned()
    }

    /// Part numbers the store holds for `upload_id`.
    #[must_use]
    pub fn stored_parts(&self, upload_id: &str) -> Vec<u32> {
        self.state
            .lock()
            .uploads
            .get(upload_id)
            .map(|upload| upload.parts.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Number of uploads neither completed nor aborted.
    #[must_use]
    pub fn open_uploads(&self) -> usize {
        self.state.lock().uploads.len()
    }

    /// Part bodies currently being received.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of part bodies received at the same time.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Record `op`, then fail it, or wait if it is held before applying.
    async fn enter(&self, op: Op, detail: String) -> Result<Option<Hold>, UploadError> {
        self.calls.lock().push((op, detail));
        let hold = self.holds.lock().get(&op).copied();
        if hold == Some(Hold::BeforeApply) {
            self.wait_for_release().await;
        }
        let fault = self.faults.lock().get_mut(&op).and_then(VecDeque::pop_front);
        match fault {
            Some(err) => Err(err),
            None => Ok(hold),
        }
    }

    async fn leave(&self, hold: Option<Hold>) {
        if hold == Some(Hold::AfterApply) {
            self.wait_for_release().await;
        }
    }

    async fn wait_for_release(&self) {
        let mut rx = self.gate.subscribe();
        let _ = rx.wait_for(|released| *released).await;
    }
}

/// Counts a part body as in flight until dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn no_such_upload(upload_id: &str) -> UploadError {
    UploadError::ServerRejection(format!("NoSuchUpload: {upload_id}"))
}

/// Extract `(uploadId, partNumber)` from a part URL.
fn parse_part_url(url: &str) -> Option<(String, u32)> {
    let (_, query) = url.split_once('?')?;
    let mut upload_id = None;
    let mut part_number = None;
    for pair in query.split('&') {
        let (name, value) = pair.split_once('=')?;
        let value = urlencoding::decode(value).ok()?.into_owned();
        match name {
            "uploadId" => upload_id = Some(value),
            "partNumber" => part_number = value.parse().ok(),
            _ => {}
        }
    }
    Some((upload_id?, part_number?))
}

#[async_trait]
impl ControlPlane for MemoryStore {
    async fn create_multipart_upload(
        &self,
        file: &dyn UploadSource,
    ) -> Result<RemoteUpload, UploadError> {
        let key = format!("files/{}", file.name());
        let hold = self.enter(Op::Create, key.clone()).await?;
        let upload_id = uuid::Uuid::new_v4().to_string();
        self.state.lock().uploads.insert(
            upload_id.clone(),
            StoredUpload {
                key: key.clone(),
                parts: BTreeMap::new(),
            },
        );
        self.leave(hold).await;
        Ok(RemoteUpload { upload_id, key })
    }

    async fn list_parts(&self, _key: &str, upload_id: &str) -> Result<Vec<Part>, UploadError> {
        let hold = self.enter(Op::ListParts, upload_id.to_owned()).await?;
        let parts = {
            let state = self.state.lock();
            let upload = state
                .uploads
                .get(upload_id)
                .ok_or_else(|| no_such_upload(upload_id))?;
            upload
                .parts
                .iter()
                .map(|(&part_number, part)| Part {
                    part_number,
                    size: part.data.len() as u64,
                    checksum_token: part.etag.clone(),
                })
                .collect()
        };
        self.leave(hold).await;
        Ok(parts)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[Part],
    ) -> Result<CompletedUpload, UploadError> {
        let numbers: Vec<String> = parts.iter().map(|p| p.part_number.to_string()).collect();
        let hold = self.enter(Op::Complete, numbers.join(",")).await?;
        {
            let mut state = self.state.lock();
            let upload = state
                .uploads
                .get(upload_id)
                .ok_or_else(|| no_such_upload(upload_id))?;
            if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
                return Err(UploadError::ServerRejection("InvalidPartOrder".to_owned()));
            }
            let mut object = Vec::new();
            for part in parts {
                let stored = upload
                    .parts
                    .get(&part.part_number)
                    .filter(|stored| stored.etag == part.checksum_token)
                    .ok_or_else(|| {
                        UploadError::ServerRejection(format!("InvalidPart: {}", part.part_number))
                    })?;
                object.extend_from_slice(&stored.data);
            }
            state.uploads.remove(upload_id);
            state.objects.insert(key.to_owned(), object);
        }
        self.leave(hold).await;
        Ok(CompletedUpload {
            location: format!("memory://{}/{key}", self.bucket),
            checksum_token: Some(format!("\"{}-{}\"", upload_id, parts.len())),
        })
    }

    async fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> Result<(), UploadError> {
        let hold = self.enter(Op::Abort, upload_id.to_owned()).await?;
        let removed = self.state.lock().uploads.remove(upload_id);
        self.leave(hold).await;
        removed.map(|_| ()).ok_or_else(|| no_such_upload(upload_id))
    }

    async fn sign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<PresignedRequest, UploadError> {
        let hold = self
            .enter(Op::SignPart(part_number), upload_id.to_owned())
            .await?;
        self.leave(hold).await;
        Ok(PresignedRequest::put(format!(
            "memory://{}/{key}?partNumber={part_number}&uploadId={}",
            self.bucket,
            urlencoding::encode(upload_id)
        )))
    }

    async fn get_short_lived_credentials(&self) -> Result<TemporaryCredentials, UploadError> {
        let hold = self.enter(Op::Credentials, String::new()).await?;
        self.leave(hold).await;
        self.credentials.clone().ok_or_else(|| {
            UploadError::Authentication("no short-lived credentials configured".to_owned())
        })
    }
}

#[async_trait]
impl PartTransport for MemoryStore {
    async fn send_part(&self, request: &PresignedRequest, body: Bytes) -> Result<String, UploadError> {
        let (upload_id, part_number) = parse_part_url(&request.url).ok_or_else(|| {
            UploadError::ServerRejection(format!("malformed part URL {}", request.url))
        })?;
        let _in_flight = InFlight::enter(&self.in_flight, &self.max_in_flight);

        let hold = self
            .enter(Op::SendPart(part_number), request.url.clone())
            .await?;
        let delay = *self.send_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let etag = format!("\"{}\"", uuid::Uuid::new_v4().simple());
        {
            let mut state = self.state.lock();
            let upload = state
                .uploads
                .get_mut(&upload_id)
                .ok_or_else(|| no_such_upload(&upload_id))?;
            upload.parts.insert(
                part_number,
                StoredPart {
                    etag: etag.clone(),
                    data: body,
                },
            );
        }
        self.leave(hold).await;
        Ok(etag)
    }
}

/// A session context on `store` with [`CHUNK`]-byte parts, two parts in
/// flight and retry delays of `[0, 1000]` ms.
#[must_use]
pub fn context(store: &Arc<MemoryStore>) -> SessionContext {
    SessionContext::new(store.clone(), store.clone())
        .with_chunk_size(CHUNK)
        .with_part_concurrency(2)
        .with_retry(RetryPolicy::new(RetrySpec::schedule(vec![0, 1_000])))
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

mod test_http_transport;
mod test_retry;
mod test_signing;
