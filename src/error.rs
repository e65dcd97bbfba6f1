use std::time::Duration;
use thiserror::Error;

/// Errors raised on the capture and storage path.
///
/// These halt recording when they occur mid-session; upload failures are
/// contained in the upload queue and surfaced as chunk events instead.
#[derive(Debug, Error)]
pub enum CourierError {
    #[error("capture permission denied: {0}")]
    PermissionDenied(String),

    #[error(
        "insufficient disk space: {available_bytes} bytes free, minimum {required_bytes} required"
    )]
    InsufficientDiskSpace {
        available_bytes: u64,
        required_bytes: u64,
    },

    #[error("invalid state for {operation}: {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("capture stream ended unexpectedly")]
    CaptureStreamLost,

    #[error("chunk I/O failure: {0}")]
    ChunkIo(#[from] std::io::Error),

    #[error("chunk encoding failure: {0}")]
    ChunkEncode(#[from] hound::Error),

    #[error("manifest serialization failure: {0}")]
    ManifestSerde(#[from] serde_json::Error),

    #[error("unknown chunk: {0}")]
    UnknownChunk(String),

    #[error("upload queue is shut down")]
    QueueClosed,

    #[error(transparent)]
    Upload(#[from] RemoteStoreError),
}

/// Errors raised by the remote object store protocol.
#[derive(Debug, Error)]
pub enum RemoteStoreError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("credentials expired")]
    CredentialsExpired,

    #[error("upload protocol failure: {0}")]
    Protocol(String),

    #[error("upload rejected: {0}")]
    Validation(String),

    #[error("chunk read failure: {0}")]
    ChunkRead(#[from] std::io::Error),
}

/// How the upload queue should react to a failed transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retry with exponential backoff, up to the attempt cap.
    Retryable,
    /// Refresh credentials out of band, then retry immediately.
    RetryAfterCredentialRefresh,
    /// Mark the chunk Failed without further attempts.
    Permanent,
}

impl RemoteStoreError {
    /// Stable classification used by the retry loop. Exhaustive on purpose:
    /// a new variant must decide its class here before it compiles.
    pub fn class(&self) -> FailureClass {
        match self {
            RemoteStoreError::Network(_) => FailureClass::Retryable,
            RemoteStoreError::Timeout(_) => FailureClass::Retryable,
            RemoteStoreError::Protocol(_) => FailureClass::Retryable,
            RemoteStoreError::CredentialsExpired => FailureClass::RetryAfterCredentialRefresh,
            RemoteStoreError::Validation(_) => FailureClass::Permanent,
            RemoteStoreError::ChunkRead(_) => FailureClass::Permanent,
        }
    }
}
