use serde::{Deserialize, Serialize};

/// Chunk durability announcement published after a successful upload
#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkUploadedMessage {
    pub session_id: String,
    pub chunk_id: String,
    pub chunk_index: u32,
    pub size_bytes: u64,
    pub attempts: u32,
    pub timestamp: String, // RFC3339 timestamp
}

/// Published when a chunk exhausts its upload attempts
#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkFailedMessage {
    pub session_id: String,
    pub chunk_id: String,
    pub chunk_index: u32,
    pub attempts: u32,
    pub error: String,
    pub timestamp: String, // RFC3339 timestamp
}

/// Published once per session; carries the chunk count consumers need to
/// decide when every upload announcement has arrived
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionStoppedMessage {
    pub session_id: String,
    pub expected_chunks: u32,
    pub timestamp: String, // RFC3339 timestamp
}
