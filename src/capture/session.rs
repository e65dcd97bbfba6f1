use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::source::{CaptureSource, MediaFrame};
use crate::error::CourierError;
use crate::events::{EventBus, PipelineEvent};
use crate::store::{ChunkStore, ChunkWriter, SealedChunk};

/// Recording session lifecycle. Stopped is terminal for a session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Recording,
    Paused,
    Stopped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Paused => "paused",
            SessionState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Capture session configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub session_id: String,
    /// Media time per chunk before rotating files
    pub chunk_duration: Duration,
}

/// Drives chunk boundaries from a continuous media stream.
///
/// One session owns one capture/write path: frames arrive on a channel from
/// the injected source, rotation happens between frames (a frame is never
/// split across chunks), and sealed chunks leave through `chunk_tx` in index
/// order. Pausing stops feeding the writer without tearing down the stream.
pub struct CaptureSession {
    config: CaptureConfig,
    store: Arc<ChunkStore>,
    state: Arc<StdMutex<SessionState>>,
    paused: Arc<AtomicBool>,
    sealed_count: Arc<AtomicU32>,
    frames_written: Arc<AtomicU64>,
    frames_dropped: Arc<AtomicU64>,
    chunk_tx: mpsc::Sender<SealedChunk>,
    events: EventBus,
    stop_tx: watch::Sender<bool>,
    task: Arc<Mutex<Option<JoinHandle<Result<(), CourierError>>>>>,
}

impl CaptureSession {
    pub fn new(
        config: CaptureConfig,
        store: ChunkStore,
        events: EventBus,
        chunk_tx: mpsc::Sender<SealedChunk>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);

        Self {
            config,
            store: Arc::new(store),
            state: Arc::new(StdMutex::new(SessionState::Idle)),
            paused: Arc::new(AtomicBool::new(false)),
            sealed_count: Arc::new(AtomicU32::new(0)),
            frames_written: Arc::new(AtomicU64::new(0)),
            frames_dropped: Arc::new(AtomicU64::new(0)),
            chunk_tx,
            events,
            stop_tx,
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// Acquire the stream from `source` and begin writing chunk 0.
    pub async fn start(&self, mut source: Box<dyn CaptureSource>) -> Result<(), CourierError> {
        self.transition("start recording", SessionState::Idle, SessionState::Recording)?;

        if let Err(e) = source.check_permission().await {
            self.set_state(SessionState::Idle);
            return Err(e);
        }

        let frames = match source.start().await {
            Ok(rx) => rx,
            Err(e) => {
                self.set_state(SessionState::Idle);
                return Err(e);
            }
        };

        info!(
            "Recording session {} started (source: {})",
            self.config.session_id,
            source.name()
        );
        self.events.emit(PipelineEvent::SessionStarted {
            session_id: self.config.session_id.clone(),
            timestamp: Utc::now(),
        });

        let worker = CaptureWorker {
            session_id: self.config.session_id.clone(),
            rotation: ChunkRotation {
                store: Arc::clone(&self.store),
                chunk_duration_ms: self.config.chunk_duration.as_millis() as u64,
                current: None,
                next_index: 0,
            },
            frames,
            paused: Arc::clone(&self.paused),
            stop_rx: self.stop_tx.subscribe(),
            chunk_tx: self.chunk_tx.clone(),
            events: self.events.clone(),
            sealed_count: Arc::clone(&self.sealed_count),
            frames_written: Arc::clone(&self.frames_written),
            frames_dropped: Arc::clone(&self.frames_dropped),
        };

        let handle = tokio::spawn(async move {
            let result = worker.run().await;

            // Release the stream whatever happened to the write path
            if let Err(e) = source.stop().await {
                error!("Failed to stop capture source: {}", e);
            }

            result
        });

        {
            let mut task = self.task.lock().await;
            *task = Some(handle);
        }

        Ok(())
    }

    /// Stop feeding samples to the writer; the stream stays live and the
    /// current chunk stays open until resume.
    pub fn pause(&self) -> Result<(), CourierError> {
        self.transition("pause recording", SessionState::Recording, SessionState::Paused)?;
        self.paused.store(true, Ordering::SeqCst);

        info!("Recording session {} paused", self.config.session_id);
        self.events.emit(PipelineEvent::SessionPaused {
            session_id: self.config.session_id.clone(),
        });
        Ok(())
    }

    pub fn resume(&self) -> Result<(), CourierError> {
        self.transition("resume recording", SessionState::Paused, SessionState::Recording)?;
        self.paused.store(false, Ordering::SeqCst);

        info!("Recording session {} resumed", self.config.session_id);
        self.events.emit(PipelineEvent::SessionResumed {
            session_id: self.config.session_id.clone(),
        });
        Ok(())
    }

    /// Finalize the current (possibly partial) chunk, release the stream,
    /// and return the total number of sealed chunks.
    pub async fn stop(&self) -> Result<u32, CourierError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                SessionState::Recording | SessionState::Paused => {
                    *state = SessionState::Stopped;
                }
                other => {
                    return Err(CourierError::InvalidState {
                        operation: "stop recording",
                        state: other.as_str().to_string(),
                    });
                }
            }
        }

        self.paused.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.send(true);

        let handle = {
            let mut task = self.task.lock().await;
            task.take()
        };

        if let Some(handle) = handle {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Capture loop failed: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    error!("Capture task panicked: {}", e);
                    return Err(CourierError::CaptureStreamLost);
                }
            }
        }

        let sealed = self.sealed_count.load(Ordering::SeqCst);
        info!(
            "Recording session {} stopped ({} chunks sealed)",
            self.config.session_id, sealed
        );
        Ok(sealed)
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn chunks_sealed(&self) -> u32 {
        self.sealed_count.load(Ordering::SeqCst)
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::SeqCst)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::SeqCst)
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = next;
    }

    fn transition(
        &self,
        operation: &'static str,
        expected: SessionState,
        next: SessionState,
    ) -> Result<(), CourierError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != expected {
            return Err(CourierError::InvalidState {
                operation,
                state: state.as_str().to_string(),
            });
        }
        *state = next;
        Ok(())
    }
}

/// Rotation bookkeeping: the single open writer plus the next index.
struct ChunkRotation {
    store: Arc<ChunkStore>,
    chunk_duration_ms: u64,
    current: Option<ChunkWriter>,
    next_index: u32,
}

impl ChunkRotation {
    /// Seal the open chunk when `frame` crosses the time boundary. The
    /// sealing frame itself belongs to the next chunk.
    fn seal_if_due(&mut self, frame: &MediaFrame) -> Result<Option<SealedChunk>, CourierError> {
        let due = matches!(
            &self.current,
            Some(w) if frame.timestamp_ms.saturating_sub(w.start_ms()) >= self.chunk_duration_ms
        );
        if !due {
            return Ok(None);
        }
        match self.current.take() {
            Some(writer) => Ok(Some(writer.finalize()?)),
            None => Ok(None),
        }
    }

    fn write(&mut self, frame: &MediaFrame) -> Result<(), CourierError> {
        if self.current.is_none() {
            self.current = Some(self.store.start_chunk(self.next_index, frame)?);
            self.next_index += 1;
        }
        if let Some(writer) = &mut self.current {
            writer.write_frame(frame)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<Option<SealedChunk>, CourierError> {
        match self.current.take() {
            Some(writer) => Ok(Some(writer.finalize()?)),
            None => Ok(None),
        }
    }

    fn abort_current(&mut self) {
        if let Some(writer) = self.current.take() {
            writer.abort();
        }
    }
}

/// The spawned write path for one session.
struct CaptureWorker {
    session_id: String,
    rotation: ChunkRotation,
    frames: mpsc::Receiver<MediaFrame>,
    paused: Arc<AtomicBool>,
    stop_rx: watch::Receiver<bool>,
    chunk_tx: mpsc::Sender<SealedChunk>,
    events: EventBus,
    sealed_count: Arc<AtomicU32>,
    frames_written: Arc<AtomicU64>,
    frames_dropped: Arc<AtomicU64>,
}

impl CaptureWorker {
    async fn run(mut self) -> Result<(), CourierError> {
        match self.pump().await {
            Ok(()) => {
                self.finalize_partial().await?;
                Ok(())
            }
            Err(CourierError::CaptureStreamLost) => {
                // The written samples are still good; seal them before
                // surfacing the stream failure
                if let Err(e) = self.finalize_partial().await {
                    warn!("Failed to salvage partial chunk after stream loss: {}", e);
                }
                Err(CourierError::CaptureStreamLost)
            }
            Err(e) => {
                self.rotation.abort_current();
                Err(e)
            }
        }
    }

    async fn pump(&mut self) -> Result<(), CourierError> {
        loop {
            tokio::select! {
                changed = self.stop_rx.changed() => {
                    if changed.is_err() || *self.stop_rx.borrow() {
                        return Ok(());
                    }
                }
                maybe_frame = self.frames.recv() => match maybe_frame {
                    Some(frame) => self.handle_frame(frame).await?,
                    None => {
                        if *self.stop_rx.borrow() {
                            return Ok(());
                        }
                        error!("Capture stream for {} ended without stop", self.session_id);
                        return Err(CourierError::CaptureStreamLost);
                    }
                }
            }
        }
    }

    async fn handle_frame(&mut self, frame: MediaFrame) -> Result<(), CourierError> {
        if self.paused.load(Ordering::SeqCst) {
            self.frames_dropped.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        if let Some(sealed) = self.rotation.seal_if_due(&frame)? {
            self.deliver(sealed).await;
        }

        if let Err(e) = self.rotation.write(&frame) {
            self.rotation.abort_current();
            return Err(e);
        }

        self.frames_written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn finalize_partial(&mut self) -> Result<(), CourierError> {
        if let Some(sealed) = self.rotation.finish()? {
            self.deliver(sealed).await;
        }
        Ok(())
    }

    async fn deliver(&mut self, sealed: SealedChunk) {
        let total = self.sealed_count.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "Chunk {} sealed: {} bytes, {:.1}s ({} total)",
            sealed.index,
            sealed.size_bytes,
            sealed.duration_ms as f64 / 1000.0,
            total
        );

        self.events.emit(PipelineEvent::ChunkSealed {
            session_id: sealed.session_id.clone(),
            chunk_id: sealed.chunk_id.clone(),
            chunk_index: sealed.index,
            size_bytes: sealed.size_bytes,
            duration_ms: sealed.duration_ms,
        });

        let index = sealed.index;
        if self.chunk_tx.send(sealed).await.is_err() {
            // Upload registration is gone; the file stays on disk and a
            // later manifest recovery can still pick it up
            warn!("Chunk receiver dropped, chunk {} left unregistered", index);
        }
    }
}
