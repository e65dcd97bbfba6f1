use serde::Serialize;

use crate::error::RemoteStoreError;
use crate::store::SealedChunk;

/// Handle for one in-progress multipart upload, returned by `initiate_upload`.
#[derive(Debug, Clone)]
pub struct RemoteUploadId {
    pub key: String,
    pub upload_id: String,
}

/// ETag-equivalent proof that one part was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartReceipt {
    pub part_number: u32,
    pub receipt: String,
}

/// Server-side encryption applied to every write. There is no plaintext
/// mode; implementations that cannot encrypt must reject the upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum EncryptionMode {
    #[default]
    Aes256,
}

impl EncryptionMode {
    pub fn header_value(&self) -> &'static str {
        match self {
            EncryptionMode::Aes256 => "AES256",
        }
    }
}

/// Technical metadata attached to every stored object. Deliberately free of
/// anything identifying a person; the key's user segment is already
/// sanitized upstream.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectMetadata {
    pub checksum_sha256: String,
    pub recording_id: String,
    pub chunk_id: String,
    pub chunk_index: u32,
    pub duration_ms: u64,
}

impl ObjectMetadata {
    pub fn from_chunk(chunk: &SealedChunk) -> Self {
        Self {
            checksum_sha256: chunk.checksum.as_hex().to_string(),
            recording_id: chunk.session_id.clone(),
            chunk_id: chunk.chunk_id.clone(),
            chunk_index: chunk.index,
            duration_ms: chunk.duration_ms,
        }
    }

    /// Key/value form for stores that take opaque metadata pairs.
    pub fn as_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("checksum-sha256".into(), self.checksum_sha256.clone()),
            ("recording-id".into(), self.recording_id.clone()),
            ("chunk-id".into(), self.chunk_id.clone()),
            ("chunk-index".into(), self.chunk_index.to_string()),
            ("duration-ms".into(), self.duration_ms.to_string()),
        ]
    }
}

/// Remote object store exposing the multipart protocol.
///
/// Cloud-backed implementations live outside this crate; `FsRemoteStore`
/// ships as the local implementation. All four operations must be safe to
/// call from multiple tasks at once.
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    /// Open a multipart upload session for `key`, returning an opaque
    /// upload id. Metadata and encryption apply to the completed object.
    async fn initiate_upload(
        &self,
        key: &str,
        metadata: &ObjectMetadata,
        encryption: EncryptionMode,
    ) -> Result<RemoteUploadId, RemoteStoreError>;

    /// Transfer one part. Part numbers start at 1; parts may arrive in any
    /// order and concurrently.
    async fn upload_part(
        &self,
        upload: &RemoteUploadId,
        part_number: u32,
        data: Vec<u8>,
    ) -> Result<PartReceipt, RemoteStoreError>;

    /// Assemble the object from `parts`, which the caller supplies in part
    /// order.
    async fn complete_upload(
        &self,
        upload: &RemoteUploadId,
        parts: &[PartReceipt],
    ) -> Result<(), RemoteStoreError>;

    /// Discard an initiated upload, releasing any server-side staging.
    async fn abort_upload(&self, upload: &RemoteUploadId) -> Result<(), RemoteStoreError>;
}

/// Out-of-band credential handling for stores whose tokens expire.
#[async_trait::async_trait]
pub trait CredentialsProvider: Send + Sync {
    /// Obtain fresh credentials. On success the failed transfer is retried
    /// immediately, skipping the backoff wait.
    async fn refresh(&self) -> Result<(), RemoteStoreError>;
}

/// Provider for stores with no credential lifecycle at all.
pub struct StaticCredentials;

#[async_trait::async_trait]
impl CredentialsProvider for StaticCredentials {
    async fn refresh(&self) -> Result<(), RemoteStoreError> {
        Ok(())
    }
}

/// Deterministic object key: sanitized user id, sanitized recording id,
/// zero-padded chunk index, plus a short random suffix so keys cannot be
/// enumerated from the deterministic prefix alone.
pub fn object_key(user_id: &str, recording_id: &str, chunk_index: u32) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}/{}/chunk-{:05}-{}",
        sanitize_segment(user_id),
        sanitize_segment(recording_id),
        chunk_index,
        &suffix[..8]
    )
}

/// Reduce one key segment to `[A-Za-z0-9._-]`, with path separators and
/// control characters mapped away and leading or trailing dots stripped so
/// no traversal sequence survives.
pub fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();

    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned.to_string()
    }
}
