use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

use super::remote::{
    EncryptionMode, ObjectMetadata, PartReceipt, RemoteStore, RemoteUploadId,
};
use crate::error::RemoteStoreError;
use crate::store::SealedChunk;

pub const DEFAULT_PART_SIZE: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct MultipartConfig {
    /// Byte size of each uploaded part; the final part may be shorter.
    pub part_size_bytes: u64,
    /// Parts of a single chunk uploaded in parallel.
    pub part_concurrency: usize,
    /// Deadline applied to every individual remote call.
    pub op_timeout: Duration,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            part_size_bytes: DEFAULT_PART_SIZE,
            part_concurrency: 4,
            op_timeout: Duration::from_secs(30),
        }
    }
}

/// Drives the initiate / upload parts / complete protocol for one chunk file.
///
/// Parts of the same chunk go up concurrently; completion always sends the
/// receipts in part order. Any failure after initiation aborts the remote
/// upload so the store can drop its staged parts, and the original error is
/// the one reported even when the abort itself fails.
pub struct MultipartUploader {
    store: Arc<dyn RemoteStore>,
    config: MultipartConfig,
}

impl MultipartUploader {
    pub fn new(store: Arc<dyn RemoteStore>, config: MultipartConfig) -> Self {
        Self { store, config }
    }

    pub async fn upload_chunk(
        &self,
        chunk: &SealedChunk,
        key: &str,
    ) -> Result<(), RemoteStoreError> {
        let metadata = ObjectMetadata::from_chunk(chunk);
        let upload = self
            .timed(self.store.initiate_upload(key, &metadata, EncryptionMode::Aes256))
            .await?;

        match self.send_parts(chunk, &upload).await {
            Ok(parts) => {
                debug!(
                    "Uploaded {} parts for chunk {}, completing",
                    parts.len(),
                    chunk.chunk_id
                );
                match self.timed(self.store.complete_upload(&upload, &parts)).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        self.abort_quietly(&upload).await;
                        Err(e)
                    }
                }
            }
            Err(e) => {
                self.abort_quietly(&upload).await;
                Err(e)
            }
        }
    }

    async fn send_parts(
        &self,
        chunk: &SealedChunk,
        upload: &RemoteUploadId,
    ) -> Result<Vec<PartReceipt>, RemoteStoreError> {
        let count = part_count(chunk.size_bytes, self.config.part_size_bytes);
        let mut parts: Vec<PartReceipt> = stream::iter(1..=count)
            .map(|part_number| self.send_part(chunk, upload, part_number))
            .buffer_unordered(self.config.part_concurrency)
            .try_collect()
            .await?;
        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }

    async fn send_part(
        &self,
        chunk: &SealedChunk,
        upload: &RemoteUploadId,
        part_number: u32,
    ) -> Result<PartReceipt, RemoteStoreError> {
        let data = read_part(
            &chunk.path,
            chunk.size_bytes,
            self.config.part_size_bytes,
            part_number,
        )
        .await?;
        self.timed(self.store.upload_part(upload, part_number, data))
            .await
    }

    /// An abort failure must never mask the error that triggered it.
    async fn abort_quietly(&self, upload: &RemoteUploadId) {
        if let Err(abort_err) = self.store.abort_upload(upload).await {
            warn!(
                "Abort of upload {} failed after upload error: {}",
                upload.upload_id, abort_err
            );
        }
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, RemoteStoreError>
    where
        F: Future<Output = Result<T, RemoteStoreError>>,
    {
        match tokio::time::timeout(self.config.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RemoteStoreError::Timeout(self.config.op_timeout)),
        }
    }
}

fn part_count(total_bytes: u64, part_size: u64) -> u32 {
    if total_bytes == 0 {
        return 1;
    }
    total_bytes.div_ceil(part_size) as u32
}

async fn read_part(
    path: &Path,
    total_bytes: u64,
    part_size: u64,
    part_number: u32,
) -> Result<Vec<u8>, RemoteStoreError> {
    let offset = (part_number as u64 - 1) * part_size;
    let len = part_size.min(total_bytes.saturating_sub(offset)) as usize;

    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}
