use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::remote::{EncryptionMode, ObjectMetadata, PartReceipt, RemoteStore, RemoteUploadId};
use crate::error::RemoteStoreError;
use crate::store::ChunkChecksum;

const STAGING_DIR: &str = ".multipart";
const META_FILE: &str = "meta.json";

/// Local-directory object store honoring the full multipart protocol.
///
/// Parts land in a staging directory per upload id; complete concatenates
/// them in part order into the final object path and drops the staging.
/// Backs demos and the service binary when no cloud store is wired in.
pub struct FsRemoteStore {
    root: PathBuf,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct UploadMeta {
    key: String,
    encryption: String,
    metadata: Vec<(String, String)>,
}

impl FsRemoteStore {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(STAGING_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn staging_dir(&self, upload_id: &str) -> PathBuf {
        self.root.join(STAGING_DIR).join(upload_id)
    }

    fn part_path(&self, upload_id: &str, part_number: u32) -> PathBuf {
        self.staging_dir(upload_id)
            .join(format!("part-{:05}", part_number))
    }

    fn validate_key(key: &str) -> Result<(), RemoteStoreError> {
        let path = Path::new(key);
        let safe = !key.is_empty()
            && path
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(RemoteStoreError::Validation(format!(
                "object key {:?} escapes the store root",
                key
            )));
        }
        Ok(())
    }

    async fn load_meta(&self, upload_id: &str) -> Result<UploadMeta, RemoteStoreError> {
        let bytes = tokio::fs::read(self.staging_dir(upload_id).join(META_FILE))
            .await
            .map_err(|_| {
                RemoteStoreError::Protocol(format!("unknown upload id {}", upload_id))
            })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| RemoteStoreError::Protocol(format!("corrupt upload meta: {}", e)))
    }
}

#[async_trait::async_trait]
impl RemoteStore for FsRemoteStore {
    async fn initiate_upload(
        &self,
        key: &str,
        metadata: &ObjectMetadata,
        encryption: EncryptionMode,
    ) -> Result<RemoteUploadId, RemoteStoreError> {
        Self::validate_key(key)?;

        let upload_id = uuid::Uuid::new_v4().simple().to_string();
        let dir = self.staging_dir(&upload_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RemoteStoreError::Protocol(format!("staging failed: {}", e)))?;

        let meta = UploadMeta {
            key: key.to_string(),
            encryption: encryption.header_value().to_string(),
            metadata: metadata.as_pairs(),
        };
        let bytes = serde_json::to_vec_pretty(&meta)
            .map_err(|e| RemoteStoreError::Protocol(format!("meta encode failed: {}", e)))?;
        tokio::fs::write(dir.join(META_FILE), bytes)
            .await
            .map_err(|e| RemoteStoreError::Protocol(format!("meta write failed: {}", e)))?;

        debug!("Initiated upload {} for key {}", upload_id, key);
        Ok(RemoteUploadId {
            key: key.to_string(),
            upload_id,
        })
    }

    async fn upload_part(
        &self,
        upload: &RemoteUploadId,
        part_number: u32,
        data: Vec<u8>,
    ) -> Result<PartReceipt, RemoteStoreError> {
        if part_number == 0 {
            return Err(RemoteStoreError::Validation(
                "part numbers start at 1".to_string(),
            ));
        }
        if !tokio::fs::try_exists(self.staging_dir(&upload.upload_id))
            .await
            .unwrap_or(false)
        {
            return Err(RemoteStoreError::Protocol(format!(
                "unknown upload id {}",
                upload.upload_id
            )));
        }

        let receipt = ChunkChecksum::from_bytes(&data).as_hex().to_string();
        let path = self.part_path(&upload.upload_id, part_number);
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| RemoteStoreError::Protocol(format!("part write failed: {}", e)))?;

        debug!(
            "Stored part {} of upload {} ({} bytes)",
            part_number,
            upload.upload_id,
            data.len()
        );
        Ok(PartReceipt {
            part_number,
            receipt,
        })
    }

    async fn complete_upload(
        &self,
        upload: &RemoteUploadId,
        parts: &[PartReceipt],
    ) -> Result<(), RemoteStoreError> {
        let meta = self.load_meta(&upload.upload_id).await?;
        if parts.is_empty() {
            return Err(RemoteStoreError::Validation(
                "completion requires at least one part".to_string(),
            ));
        }

        // Receipts must cover parts 1..=n in order and match what was stored
        let assembled = self.staging_dir(&upload.upload_id).join("object");
        let mut out = tokio::fs::File::create(&assembled)
            .await
            .map_err(|e| RemoteStoreError::Protocol(format!("assembly failed: {}", e)))?;

        for (i, part) in parts.iter().enumerate() {
            if part.part_number != i as u32 + 1 {
                return Err(RemoteStoreError::Validation(format!(
                    "part list out of order at position {}",
                    i
                )));
            }

            let path = self.part_path(&upload.upload_id, part.part_number);
            let data = tokio::fs::read(&path).await.map_err(|_| {
                RemoteStoreError::Validation(format!("part {} was never uploaded", part.part_number))
            })?;

            if ChunkChecksum::from_bytes(&data).as_hex() != part.receipt {
                return Err(RemoteStoreError::Validation(format!(
                    "receipt mismatch for part {}",
                    part.part_number
                )));
            }

            out.write_all(&data)
                .await
                .map_err(|e| RemoteStoreError::Protocol(format!("assembly failed: {}", e)))?;
        }

        out.sync_all()
            .await
            .map_err(|e| RemoteStoreError::Protocol(format!("assembly sync failed: {}", e)))?;
        drop(out);

        let final_path = self.root.join(&meta.key);
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RemoteStoreError::Protocol(format!("key dirs failed: {}", e)))?;
        }
        tokio::fs::rename(&assembled, &final_path)
            .await
            .map_err(|e| RemoteStoreError::Protocol(format!("object rename failed: {}", e)))?;

        tokio::fs::remove_dir_all(self.staging_dir(&upload.upload_id))
            .await
            .ok();

        info!(
            "Completed upload {} -> {} ({} parts, sse {})",
            upload.upload_id,
            meta.key,
            parts.len(),
            meta.encryption
        );
        Ok(())
    }

    async fn abort_upload(&self, upload: &RemoteUploadId) -> Result<(), RemoteStoreError> {
        let dir = self.staging_dir(&upload.upload_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!("Aborted upload {}", upload.upload_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RemoteStoreError::Protocol(format!(
                "abort failed: {}",
                e
            ))),
        }
    }
}
