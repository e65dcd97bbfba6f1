use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{info, warn};

use crate::capture::{CaptureConfig, CaptureSession, CaptureSource, SessionState};
use crate::config::Config;
use crate::error::CourierError;
use crate::events::{EventBus, PipelineEvent};
use crate::manifest::{ManifestEntry, StatusCounts, UploadManifest, UploadProgress};
use crate::store::{ChunkStore, ChunkStoreConfig, SealedChunk};
use crate::upload::{
    CredentialsProvider, MultipartConfig, MultipartUploader, QueueConfig, RemoteStore,
    RetryPolicy, UploadQueue,
};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub session_id: String,
    pub user_id: String,
    /// Root directory holding one subdirectory per session
    pub recordings_dir: PathBuf,
    pub chunk_duration: Duration,
    pub min_free_disk_bytes: u64,
    pub queue: QueueConfig,
    pub multipart: MultipartConfig,
}

impl PipelineConfig {
    pub fn from_config(config: &Config, session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: config.upload.user_id.clone(),
            recordings_dir: PathBuf::from(&config.recording.recordings_dir),
            chunk_duration: Duration::from_secs(config.recording.chunk_duration_secs),
            min_free_disk_bytes: config.recording.min_free_disk_bytes,
            queue: QueueConfig {
                concurrency: config.upload.concurrency,
                max_attempts: config.upload.max_attempts,
                retry: RetryPolicy {
                    base: Duration::from_millis(config.upload.retry_base_ms),
                    max: Duration::from_millis(config.upload.retry_max_ms),
                    jitter: config.upload.retry_jitter,
                },
            },
            multipart: MultipartConfig {
                part_size_bytes: config.upload.part_size_bytes,
                op_timeout: Duration::from_secs(config.upload.op_timeout_secs),
                ..MultipartConfig::default()
            },
        }
    }

    pub fn session_dir(&self) -> PathBuf {
        self.recordings_dir.join(&self.session_id)
    }
}

/// Point-in-time snapshot of one pipeline for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub session_id: String,
    pub state: SessionState,
    pub started_at: Option<DateTime<Utc>>,
    pub chunks_sealed: u32,
    pub chunks_pending: u32,
    pub chunks_uploading: u32,
    pub chunks_uploaded: u32,
    pub chunks_failed: u32,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub upload_ratio: f64,
}

/// One recording session wired end to end: capture rotating chunk files,
/// the manifest tracking them, and the upload queue draining to the remote
/// store. The capture path never waits on uploads; sealed chunks cross a
/// channel to a forwarding task that registers and enqueues them.
pub struct RecordingPipeline {
    config: PipelineConfig,
    events: EventBus,
    capture: CaptureSession,
    queue: Arc<UploadQueue>,
    manifest: Arc<Mutex<UploadManifest>>,
    started_at: StdMutex<Option<DateTime<Utc>>>,
}

impl RecordingPipeline {
    pub fn new(
        config: PipelineConfig,
        remote: Arc<dyn RemoteStore>,
        credentials: Arc<dyn CredentialsProvider>,
    ) -> Result<Self, CourierError> {
        let events = EventBus::default();
        let session_dir = config.session_dir();

        let manifest = Arc::new(Mutex::new(UploadManifest::open(
            &config.session_id,
            &session_dir,
        )?));

        let uploader = MultipartUploader::new(remote, config.multipart.clone());
        let queue = Arc::new(UploadQueue::start(
            config.queue.clone(),
            &config.session_id,
            &config.user_id,
            Arc::clone(&manifest),
            uploader,
            credentials,
            events.clone(),
        ));

        let (chunk_tx, chunk_rx) = mpsc::channel(64);
        let capture = CaptureSession::new(
            CaptureConfig {
                session_id: config.session_id.clone(),
                chunk_duration: config.chunk_duration,
            },
            ChunkStore::new(ChunkStoreConfig {
                session_id: config.session_id.clone(),
                session_dir,
                min_free_bytes: config.min_free_disk_bytes,
            })?,
            events.clone(),
            chunk_tx,
        );

        tokio::spawn(forward_chunks(chunk_rx, Arc::clone(&queue)));

        Ok(Self {
            config,
            events,
            capture,
            queue,
            manifest,
            started_at: StdMutex::new(None),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn state(&self) -> SessionState {
        self.capture.state()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub async fn start(&self, source: Box<dyn CaptureSource>) -> Result<(), CourierError> {
        self.capture.start(source).await?;
        let mut started = self.started_at.lock().unwrap_or_else(|e| e.into_inner());
        *started = Some(Utc::now());
        Ok(())
    }

    pub fn pause(&self) -> Result<(), CourierError> {
        self.capture.pause()
    }

    pub fn resume(&self) -> Result<(), CourierError> {
        self.capture.resume()
    }

    /// Stop capture, then announce how many chunks the session produced so
    /// downstream consumers know when the upload set is complete. Capture
    /// errors surface after the announcement; the sealed chunks are real
    /// either way.
    pub async fn stop(&self) -> Result<u32, CourierError> {
        let result = self.capture.stop().await;
        if matches!(result, Err(CourierError::InvalidState { .. })) {
            return result;
        }

        let sealed = self.capture.chunks_sealed();
        self.events.emit(PipelineEvent::SessionStopped {
            session_id: self.config.session_id.clone(),
            expected_chunks: sealed,
            timestamp: Utc::now(),
        });

        result.map(|_| sealed)
    }

    pub fn pause_uploads(&self) {
        self.queue.pause();
    }

    pub async fn resume_uploads(&self) -> Result<usize, CourierError> {
        self.queue.resume().await
    }

    pub async fn retry_chunk(&self, chunk_id: &str) -> Result<(), CourierError> {
        self.queue.retry_chunk(chunk_id).await
    }

    /// Restart path: pick up chunk files the manifest never saw, put
    /// interrupted chunks back to pending, and enqueue everything owed.
    pub async fn rehydrate(&self) -> Result<usize, CourierError> {
        let recovered = {
            let mut manifest = self.manifest.lock().await;
            manifest.recover_from_disk()?
        };
        if recovered > 0 {
            info!(
                "Recovered {} chunk files missing from the manifest of {}",
                recovered, self.config.session_id
            );
        }
        self.queue.resume().await
    }

    pub async fn chunks(&self) -> Vec<ManifestEntry> {
        self.manifest.lock().await.entries_in_order()
    }

    pub async fn progress(&self) -> UploadProgress {
        self.manifest.lock().await.progress()
    }

    pub async fn stats(&self) -> PipelineStats {
        let (counts, progress) = {
            let manifest = self.manifest.lock().await;
            (manifest.status_counts(), manifest.progress())
        };
        let started_at = *self.started_at.lock().unwrap_or_else(|e| e.into_inner());

        PipelineStats {
            session_id: self.config.session_id.clone(),
            state: self.capture.state(),
            started_at,
            chunks_sealed: self.capture.chunks_sealed(),
            chunks_pending: counts.pending,
            chunks_uploading: counts.uploading,
            chunks_uploaded: counts.uploaded,
            chunks_failed: counts.failed,
            uploaded_bytes: progress.uploaded_bytes,
            total_bytes: progress.total_bytes,
            upload_ratio: progress.ratio,
        }
    }

    /// Wait until every sealed chunk is registered and no upload is pending
    /// or in flight. Intended for shutdown and tests; with uploads paused
    /// and work owed this never returns.
    pub async fn drain(&self) -> StatusCounts {
        let expected = self.capture.chunks_sealed();
        loop {
            let counts = self.manifest.lock().await.status_counts();
            let registered =
                counts.pending + counts.uploading + counts.uploaded + counts.failed;
            if registered >= expected && counts.pending == 0 && counts.uploading == 0 {
                return counts;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn forward_chunks(mut chunk_rx: mpsc::Receiver<SealedChunk>, queue: Arc<UploadQueue>) {
    while let Some(chunk) = chunk_rx.recv().await {
        if let Err(e) = queue.enqueue(&chunk).await {
            warn!("Chunk {} could not be enqueued: {}", chunk.chunk_id, e);
        }
    }
}
