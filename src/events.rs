use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// Typed events emitted by a recording pipeline.
///
/// Chunk events carry the chunk index; events produced on the rotation path
/// are emitted in index order, and the broadcast channel preserves emission
/// order for every subscriber. The completion detector downstream combines
/// `ChunkUploaded` events with the `expected_chunks` value in
/// `SessionStopped` to decide when a recording is fully durable.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    SessionStarted {
        session_id: String,
        timestamp: DateTime<Utc>,
    },
    SessionPaused {
        session_id: String,
    },
    SessionResumed {
        session_id: String,
    },
    SessionStopped {
        session_id: String,
        expected_chunks: u32,
        timestamp: DateTime<Utc>,
    },
    ChunkSealed {
        session_id: String,
        chunk_id: String,
        chunk_index: u32,
        size_bytes: u64,
        duration_ms: u64,
    },
    ChunkUploaded {
        session_id: String,
        chunk_id: String,
        chunk_index: u32,
        size_bytes: u64,
        attempts: u32,
    },
    ChunkFailed {
        session_id: String,
        chunk_id: String,
        chunk_index: u32,
        attempts: u32,
        error: String,
    },
    UploadProgress {
        session_id: String,
        uploaded_bytes: u64,
        total_bytes: u64,
        ratio: f64,
    },
}

/// Broadcast bus carrying pipeline events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Send an event to all current subscribers. Events emitted with no
    /// subscriber attached are dropped silently.
    pub fn emit(&self, event: PipelineEvent) {
        debug!("Emitting event: {:?}", event);
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
