use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use super::multipart::MultipartUploader;
use super::remote::{object_key, CredentialsProvider};
use super::retry::RetryPolicy;
use crate::error::{CourierError, FailureClass, RemoteStoreError};
use crate::events::{EventBus, PipelineEvent};
use crate::manifest::{ChunkStatus, StatusCounts, UploadManifest, UploadProgress};
use crate::store::SealedChunk;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Chunks uploading at the same time.
    pub concurrency: usize,
    /// Attempts per chunk before it is marked failed.
    pub max_attempts: u32,
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            max_attempts: 5,
            retry: RetryPolicy::default(),
        }
    }
}

struct UploadJob {
    chunk_id: String,
}

/// Bounded-concurrency upload queue over the session manifest.
///
/// Sealed chunks are enqueued as they close and picked up by worker tasks,
/// at most `concurrency` at a time. The manifest is the source of truth: a
/// worker only starts a chunk whose status is still pending, so duplicate
/// jobs from a resume are harmless. Pausing stops new work from being
/// claimed while in-flight transfers run to completion.
pub struct UploadQueue {
    inner: Arc<QueueInner>,
    job_tx: mpsc::UnboundedSender<UploadJob>,
}

struct QueueInner {
    config: QueueConfig,
    session_id: String,
    user_id: String,
    manifest: Arc<Mutex<UploadManifest>>,
    uploader: MultipartUploader,
    credentials: Arc<dyn CredentialsProvider>,
    events: EventBus,
    semaphore: Arc<Semaphore>,
    paused: watch::Sender<bool>,
}

impl UploadQueue {
    pub fn start(
        config: QueueConfig,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        manifest: Arc<Mutex<UploadManifest>>,
        uploader: MultipartUploader,
        credentials: Arc<dyn CredentialsProvider>,
        events: EventBus,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (paused, _) = watch::channel(false);
        let inner = Arc::new(QueueInner {
            semaphore: Arc::new(Semaphore::new(config.concurrency)),
            config,
            session_id: session_id.into(),
            user_id: user_id.into(),
            manifest,
            uploader,
            credentials,
            events,
            paused,
        });

        tokio::spawn(Arc::clone(&inner).dispatch(job_rx));
        Self { inner, job_tx }
    }

    /// Register a freshly sealed chunk and hand it to the workers.
    pub async fn enqueue(&self, chunk: &SealedChunk) -> Result<(), CourierError> {
        {
            let mut manifest = self.inner.manifest.lock().await;
            manifest.register(chunk)?;
        }
        self.submit(chunk.chunk_id.clone())
    }

    /// Put a failed chunk back in line. Only failed chunks are eligible;
    /// anything else is either done or already on its way.
    pub async fn retry_chunk(&self, chunk_id: &str) -> Result<(), CourierError> {
        {
            let mut manifest = self.inner.manifest.lock().await;
            let entry = manifest
                .entry(chunk_id)
                .ok_or_else(|| CourierError::UnknownChunk(chunk_id.to_string()))?;
            if entry.status != ChunkStatus::Failed {
                return Err(CourierError::InvalidState {
                    operation: "retry chunk",
                    state: format!("{:?}", entry.status),
                });
            }
            manifest.mark_pending(chunk_id)?;
        }
        info!("Re-enqueued failed chunk {}", chunk_id);
        self.submit(chunk_id.to_string())
    }

    /// Stop claiming new chunks. Transfers already running finish normally.
    pub fn pause(&self) {
        self.inner.paused.send_replace(true);
        info!("Upload queue paused");
    }

    /// Resume claiming and re-enqueue everything the manifest still owes.
    /// Interrupted chunks are put back to pending first, so this also
    /// serves as rehydration after a restart.
    pub async fn resume(&self) -> Result<usize, CourierError> {
        let owed = {
            let mut manifest = self.inner.manifest.lock().await;
            manifest.requeue_incomplete()?
        };
        let count = owed.len();
        for chunk_id in owed {
            self.submit(chunk_id)?;
        }
        self.inner.paused.send_replace(false);
        if count > 0 {
            info!("Upload queue resumed with {} chunks owed", count);
        } else {
            info!("Upload queue resumed");
        }
        Ok(count)
    }

    pub async fn progress(&self) -> UploadProgress {
        self.inner.manifest.lock().await.progress()
    }

    pub async fn status_counts(&self) -> StatusCounts {
        self.inner.manifest.lock().await.status_counts()
    }

    /// Wait until no chunk is pending or in flight. Terminal failures count
    /// as settled; pausing with work owed means this never returns.
    pub async fn settled(&self) {
        loop {
            let counts = self.status_counts().await;
            if counts.pending == 0 && counts.uploading == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn submit(&self, chunk_id: String) -> Result<(), CourierError> {
        self.job_tx
            .send(UploadJob { chunk_id })
            .map_err(|_| CourierError::QueueClosed)
    }
}

impl QueueInner {
    async fn dispatch(self: Arc<Self>, mut job_rx: mpsc::UnboundedReceiver<UploadJob>) {
        let mut paused_rx = self.paused.subscribe();
        while let Some(job) = job_rx.recv().await {
            while *paused_rx.borrow_and_update() {
                if paused_rx.changed().await.is_err() {
                    return;
                }
            }
            let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let inner = Arc::clone(&self);
            tokio::spawn(async move {
                inner.run_job(job.chunk_id, permit).await;
            });
        }
        debug!("Upload dispatcher for session {} shut down", self.session_id);
    }

    async fn run_job(&self, chunk_id: String, _permit: OwnedSemaphorePermit) {
        // Claim atomically: only a pending chunk may start, which makes
        // duplicate jobs in the channel skip out here.
        let (chunk, first_attempt) = {
            let mut manifest = self.manifest.lock().await;
            let Some(entry) = manifest.entry(&chunk_id) else {
                warn!("Dropping job for unknown chunk {}", chunk_id);
                return;
            };
            if entry.status != ChunkStatus::Pending {
                debug!(
                    "Chunk {} is {:?}, skipping duplicate job",
                    chunk_id, entry.status
                );
                return;
            }
            let attempt = match manifest.mark_uploading(&chunk_id) {
                Ok(attempt) => attempt,
                Err(e) => {
                    warn!("Could not claim chunk {}: {}", chunk_id, e);
                    return;
                }
            };
            (entry.to_sealed(&self.session_id), attempt)
        };

        let key = object_key(&self.user_id, &self.session_id, chunk.index);
        let mut attempt = first_attempt;

        loop {
            debug!(
                "Uploading chunk {} attempt {}/{}",
                chunk.chunk_id, attempt, self.config.max_attempts
            );
            let err = match self.uploader.upload_chunk(&chunk, &key).await {
                Ok(()) => {
                    self.finish(&chunk, attempt).await;
                    return;
                }
                Err(err) => err,
            };

            if err.class() == FailureClass::Permanent || attempt >= self.config.max_attempts {
                self.fail(&chunk, attempt, &err).await;
                return;
            }

            match err.class() {
                FailureClass::RetryAfterCredentialRefresh => {
                    match self.credentials.refresh().await {
                        Ok(()) => {
                            info!(
                                "Credentials refreshed, retrying chunk {} without backoff",
                                chunk.chunk_id
                            );
                        }
                        Err(refresh_err) => {
                            warn!(
                                "Credential refresh for chunk {} failed: {}",
                                chunk.chunk_id, refresh_err
                            );
                            tokio::time::sleep(self.config.retry.delay_for_attempt(attempt)).await;
                        }
                    }
                }
                _ => {
                    let delay = self.config.retry.delay_for_attempt(attempt);
                    warn!(
                        "Upload attempt {} for chunk {} failed: {} (next try in {:?})",
                        attempt, chunk.chunk_id, err, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }

            attempt = {
                let mut manifest = self.manifest.lock().await;
                match manifest.mark_uploading(&chunk_id) {
                    Ok(attempt) => attempt,
                    Err(e) => {
                        warn!("Could not record retry for chunk {}: {}", chunk_id, e);
                        return;
                    }
                }
            };
        }
    }

    async fn finish(&self, chunk: &SealedChunk, attempts: u32) {
        let progress = {
            let mut manifest = self.manifest.lock().await;
            if let Err(e) = manifest.mark_uploaded(&chunk.chunk_id) {
                warn!("Could not record upload of chunk {}: {}", chunk.chunk_id, e);
            }
            manifest.progress()
        };

        info!(
            "Uploaded chunk {} ({} bytes, {} attempt{})",
            chunk.chunk_id,
            chunk.size_bytes,
            attempts,
            if attempts == 1 { "" } else { "s" }
        );
        self.events.emit(PipelineEvent::ChunkUploaded {
            session_id: self.session_id.clone(),
            chunk_id: chunk.chunk_id.clone(),
            chunk_index: chunk.index,
            size_bytes: chunk.size_bytes,
            attempts,
        });
        self.events.emit(PipelineEvent::UploadProgress {
            session_id: self.session_id.clone(),
            uploaded_bytes: progress.uploaded_bytes,
            total_bytes: progress.total_bytes,
            ratio: progress.ratio,
        });
    }

    async fn fail(&self, chunk: &SealedChunk, attempts: u32, err: &RemoteStoreError) {
        {
            let mut manifest = self.manifest.lock().await;
            if let Err(e) = manifest.mark_failed(&chunk.chunk_id, &err.to_string()) {
                warn!("Could not record failure of chunk {}: {}", chunk.chunk_id, e);
            }
        }

        error!(
            "Chunk {} failed after {} attempt{}: {}",
            chunk.chunk_id,
            attempts,
            if attempts == 1 { "" } else { "s" },
            err
        );
        self.events.emit(PipelineEvent::ChunkFailed {
            session_id: self.session_id.clone(),
            chunk_id: chunk.chunk_id.clone(),
            chunk_index: chunk.index,
            attempts,
            error: err.to_string(),
        });
    }
}
