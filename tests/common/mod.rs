#![allow(dead_code)]

// Shared test doubles: a hand-driven capture source and a scripted remote
// store whose failures are programmed per object key.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex};

use chunk_courier::capture::{CaptureSource, MediaFrame};
use chunk_courier::error::{CourierError, RemoteStoreError};
use chunk_courier::events::{EventBus, PipelineEvent};
use chunk_courier::manifest::UploadManifest;
use chunk_courier::store::{ChunkChecksum, SealedChunk};
use chunk_courier::upload::{
    CredentialsProvider, EncryptionMode, MultipartConfig, MultipartUploader, ObjectMetadata,
    PartReceipt, QueueConfig, RemoteStore, RemoteUploadId, UploadQueue,
};

pub const TEST_SESSION: &str = "rec-test";

// ============================================================================
// Capture doubles
// ============================================================================

/// Capture source fed frame by frame from the test body. The test keeps the
/// sender; dropping it without stopping simulates stream loss.
pub struct ScriptedSource {
    receiver: StdMutex<Option<mpsc::Receiver<MediaFrame>>>,
    capturing: AtomicBool,
}

pub fn scripted_source(buffer: usize) -> (mpsc::Sender<MediaFrame>, ScriptedSource) {
    let (tx, rx) = mpsc::channel(buffer);
    (
        tx,
        ScriptedSource {
            receiver: StdMutex::new(Some(rx)),
            capturing: AtomicBool::new(false),
        },
    )
}

#[async_trait]
impl CaptureSource for ScriptedSource {
    async fn check_permission(&self) -> Result<(), CourierError> {
        Ok(())
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<MediaFrame>, CourierError> {
        let rx = self
            .receiver
            .lock()
            .unwrap()
            .take()
            .ok_or(CourierError::CaptureStreamLost)?;
        self.capturing.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), CourierError> {
        self.capturing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Source whose permission probe always fails.
pub struct DeniedSource;

#[async_trait]
impl CaptureSource for DeniedSource {
    async fn check_permission(&self) -> Result<(), CourierError> {
        Err(CourierError::PermissionDenied(
            "capture not authorized".to_string(),
        ))
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<MediaFrame>, CourierError> {
        Err(CourierError::PermissionDenied(
            "capture not authorized".to_string(),
        ))
    }

    async fn stop(&mut self) -> Result<(), CourierError> {
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "denied"
    }
}

/// 16kHz mono frame covering `frame_ms` of media at `timestamp_ms`.
pub fn frame_at(timestamp_ms: u64, frame_ms: u64) -> MediaFrame {
    MediaFrame {
        samples: vec![0i16; (16_000 * frame_ms / 1000) as usize],
        sample_rate: 16_000,
        channels: 1,
        timestamp_ms,
    }
}

// ============================================================================
// Chunk fixtures
// ============================================================================

/// Write a chunk-shaped file and describe it as sealed. Upload paths only
/// read bytes, so the content does not need to be a valid WAV.
pub fn make_chunk(dir: &Path, session_id: &str, index: u32, size: usize) -> SealedChunk {
    let file_name = format!("{}-chunk-{:05}.wav", session_id, index);
    let path = dir.join(&file_name);
    let data = vec![index as u8; size];
    fs::write(&path, &data).unwrap();

    SealedChunk {
        chunk_id: format!("{}-chunk-{:05}", session_id, index),
        session_id: session_id.to_string(),
        index,
        path,
        size_bytes: size as u64,
        checksum: ChunkChecksum::from_bytes(&data),
        duration_ms: 1000,
    }
}

// ============================================================================
// Remote store double
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailStage {
    Initiate,
    Part,
    Complete,
}

#[derive(Debug, Clone, Copy)]
pub enum FailKind {
    Network,
    Credentials,
    Validation,
    Protocol,
}

impl FailKind {
    fn to_error(self) -> RemoteStoreError {
        match self {
            FailKind::Network => RemoteStoreError::Network("scripted network failure".to_string()),
            FailKind::Credentials => RemoteStoreError::CredentialsExpired,
            FailKind::Validation => RemoteStoreError::Validation("scripted rejection".to_string()),
            FailKind::Protocol => {
                RemoteStoreError::Protocol("scripted protocol failure".to_string())
            }
        }
    }
}

struct FailRule {
    marker: String,
    stage: FailStage,
    /// Remaining failures; None fails forever
    times: Option<usize>,
    kind: FailKind,
}

/// Shared credential validity between `ScriptedCredentials` and the store.
pub struct CredentialGate {
    pub valid: AtomicBool,
    pub refreshes: AtomicUsize,
    pub fail_refresh: AtomicBool,
}

impl CredentialGate {
    pub fn expired() -> Arc<Self> {
        Arc::new(Self {
            valid: AtomicBool::new(false),
            refreshes: AtomicUsize::new(0),
            fail_refresh: AtomicBool::new(false),
        })
    }
}

pub struct ScriptedCredentials {
    pub gate: Arc<CredentialGate>,
}

#[async_trait]
impl CredentialsProvider for ScriptedCredentials {
    async fn refresh(&self) -> Result<(), RemoteStoreError> {
        self.gate.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.gate.fail_refresh.load(Ordering::SeqCst) {
            return Err(RemoteStoreError::Network(
                "refresh endpoint unreachable".to_string(),
            ));
        }
        self.gate.valid.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory remote store with programmable failures and call accounting.
///
/// `max_in_flight` tracks the most chunk uploads that were ever between
/// initiate and complete/abort at once, which is how the tests observe the
/// queue's concurrency bound.
#[derive(Default)]
pub struct ScriptedRemoteStore {
    pub initiates: AtomicUsize,
    pub part_uploads: AtomicUsize,
    pub completes: AtomicUsize,
    pub aborts: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    part_delay: StdMutex<Duration>,
    rules: StdMutex<Vec<FailRule>>,
    pub completed: StdMutex<Vec<(String, Vec<u32>)>>,
    credential_gate: StdMutex<Option<Arc<CredentialGate>>>,
}

impl ScriptedRemoteStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sleep inside every part upload, holding the chunk in flight long
    /// enough for concurrency to be observable.
    pub fn set_part_delay(&self, delay: Duration) {
        *self.part_delay.lock().unwrap() = delay;
    }

    /// Fail `stage` for every object key containing `marker`, `times` times
    /// (None fails forever).
    pub fn fail_when(&self, marker: &str, stage: FailStage, times: Option<usize>, kind: FailKind) {
        self.rules.lock().unwrap().push(FailRule {
            marker: marker.to_string(),
            stage,
            times,
            kind,
        });
    }

    /// Reject every initiate with CredentialsExpired until the gate is
    /// marked valid by a refresh.
    pub fn require_credentials(&self, gate: Arc<CredentialGate>) {
        *self.credential_gate.lock().unwrap() = Some(gate);
    }

    pub fn completed_keys(&self) -> Vec<String> {
        self.completed
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn check_rules(&self, key: &str, stage: FailStage) -> Result<(), RemoteStoreError> {
        if stage == FailStage::Initiate {
            if let Some(gate) = self.credential_gate.lock().unwrap().as_ref() {
                if !gate.valid.load(Ordering::SeqCst) {
                    return Err(RemoteStoreError::CredentialsExpired);
                }
            }
        }

        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            if rule.stage != stage || !key.contains(&rule.marker) {
                continue;
            }
            match &mut rule.times {
                Some(0) => continue,
                Some(n) => {
                    *n -= 1;
                    return Err(rule.kind.to_error());
                }
                None => return Err(rule.kind.to_error()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for ScriptedRemoteStore {
    async fn initiate_upload(
        &self,
        key: &str,
        _metadata: &ObjectMetadata,
        _encryption: EncryptionMode,
    ) -> Result<RemoteUploadId, RemoteStoreError> {
        let n = self.initiates.fetch_add(1, Ordering::SeqCst) + 1;
        self.check_rules(key, FailStage::Initiate)?;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        Ok(RemoteUploadId {
            key: key.to_string(),
            upload_id: format!("upl-{:04}", n),
        })
    }

    async fn upload_part(
        &self,
        upload: &RemoteUploadId,
        part_number: u32,
        _data: Vec<u8>,
    ) -> Result<PartReceipt, RemoteStoreError> {
        self.part_uploads.fetch_add(1, Ordering::SeqCst);

        let delay = *self.part_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.check_rules(&upload.key, FailStage::Part)?;
        Ok(PartReceipt {
            part_number,
            receipt: format!("receipt-{}", part_number),
        })
    }

    async fn complete_upload(
        &self,
        upload: &RemoteUploadId,
        parts: &[PartReceipt],
    ) -> Result<(), RemoteStoreError> {
        self.check_rules(&upload.key, FailStage::Complete)?;

        self.completes.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.lock().unwrap().push((
            upload.key.clone(),
            parts.iter().map(|p| p.part_number).collect(),
        ));
        Ok(())
    }

    async fn abort_upload(&self, _upload: &RemoteUploadId) -> Result<(), RemoteStoreError> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Queue harness
// ============================================================================

pub struct QueueHarness {
    pub queue: UploadQueue,
    pub manifest: Arc<Mutex<UploadManifest>>,
    pub store: Arc<ScriptedRemoteStore>,
    pub events: EventBus,
    pub dir: tempfile::TempDir,
}

/// Default config with millisecond-scale retry delays so exhaustion tests
/// stay fast.
pub fn fast_config() -> QueueConfig {
    let mut config = QueueConfig::default();
    config.retry.base = Duration::from_millis(2);
    config.retry.max = Duration::from_millis(10);
    config
}

/// Queue wired to a scripted store over a temp-dir manifest.
pub fn queue_harness(
    config: QueueConfig,
    store: Arc<ScriptedRemoteStore>,
    credentials: Arc<dyn CredentialsProvider>,
) -> QueueHarness {
    queue_harness_in(tempfile::TempDir::new().unwrap(), config, store, credentials)
}

/// Same, but over an existing directory whose manifest may carry state from
/// an earlier "run".
pub fn queue_harness_in(
    dir: tempfile::TempDir,
    config: QueueConfig,
    store: Arc<ScriptedRemoteStore>,
    credentials: Arc<dyn CredentialsProvider>,
) -> QueueHarness {
    let manifest = Arc::new(Mutex::new(
        UploadManifest::open(TEST_SESSION, dir.path()).unwrap(),
    ));
    let events = EventBus::default();

    let uploader = MultipartUploader::new(
        Arc::clone(&store) as Arc<dyn RemoteStore>,
        MultipartConfig {
            part_size_bytes: 1024 * 1024,
            part_concurrency: 2,
            op_timeout: Duration::from_secs(5),
        },
    );

    let queue = UploadQueue::start(
        config,
        TEST_SESSION,
        "test-user",
        Arc::clone(&manifest),
        uploader,
        credentials,
        events.clone(),
    );

    QueueHarness {
        queue,
        manifest,
        store,
        events,
        dir,
    }
}

/// Wait for the queue to settle, then let in-progress event emission land.
pub async fn settle(queue: &UploadQueue) {
    tokio::time::timeout(Duration::from_secs(10), queue.settled())
        .await
        .expect("upload queue did not settle in time");
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Drain everything currently buffered on an event receiver.
pub fn drain_events(rx: &mut broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
