use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::CourierError;
use crate::store::{parse_chunk_index, ChunkChecksum, SealedChunk};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Upload lifecycle of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    Uploading,
    Uploaded,
    Failed,
}

/// One chunk's durable upload record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub chunk_id: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub index: u32,
    pub checksum: ChunkChecksum,
    pub duration_ms: u64,
    pub status: ChunkStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl ManifestEntry {
    pub fn to_sealed(&self, session_id: &str) -> SealedChunk {
        SealedChunk {
            chunk_id: self.chunk_id.clone(),
            session_id: session_id.to_string(),
            index: self.index,
            path: self.path.clone(),
            size_bytes: self.size_bytes,
            checksum: self.checksum.clone(),
            duration_ms: self.duration_ms,
        }
    }
}

/// On-disk manifest document.
#[derive(Debug, Serialize, Deserialize)]
struct ManifestFile {
    session_id: String,
    entries: Vec<ManifestEntry>,
}

/// Aggregate upload progress in bytes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UploadProgress {
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub ratio: f64,
}

/// Per-status entry counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u32,
    pub uploading: u32,
    pub uploaded: u32,
    pub failed: u32,
}

/// Crash-safe registry of per-chunk upload status for one session.
///
/// Every status transition is flushed to disk before the caller proceeds, so
/// a crash mid-upload leaves the manifest describing "not yet confirmed".
/// All mutation goes through the single owner holding this value; readers
/// get clones of entries, never references into the map.
pub struct UploadManifest {
    session_id: String,
    path: PathBuf,
    dir: PathBuf,
    entries: BTreeMap<u32, ManifestEntry>,
}

impl UploadManifest {
    /// Open the manifest in `dir`, tolerating a missing or unreadable file.
    /// A corrupted manifest is logged and treated as empty; the chunks it
    /// described are recovered from disk by `recover_from_disk`.
    pub fn open(session_id: &str, dir: &Path) -> Result<Self, CourierError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(MANIFEST_FILE);

        let entries = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<ManifestFile>(&bytes) {
                Ok(file) if file.session_id == session_id => {
                    let mut map = BTreeMap::new();
                    for entry in file.entries {
                        map.insert(entry.index, entry);
                    }
                    debug!(
                        "Loaded manifest for {} ({} entries)",
                        session_id,
                        map.len()
                    );
                    map
                }
                Ok(file) => {
                    warn!(
                        "Manifest at {:?} belongs to session {}, starting empty",
                        path, file.session_id
                    );
                    BTreeMap::new()
                }
                Err(e) => {
                    warn!(
                        "Manifest at {:?} is corrupted ({}), starting empty",
                        path, e
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Manifest at {:?} is unreadable ({}), starting empty", path, e);
                BTreeMap::new()
            }
        };

        Ok(Self {
            session_id: session_id.to_string(),
            path,
            dir: dir.to_path_buf(),
            entries,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register a freshly sealed chunk as Pending. Registering a chunk that
    /// is already present keeps the existing record untouched.
    pub fn register(&mut self, chunk: &SealedChunk) -> Result<(), CourierError> {
        if self.entries.contains_key(&chunk.index) {
            debug!("Chunk {} already registered", chunk.chunk_id);
            return Ok(());
        }

        self.entries.insert(
            chunk.index,
            ManifestEntry {
                chunk_id: chunk.chunk_id.clone(),
                path: chunk.path.clone(),
                size_bytes: chunk.size_bytes,
                index: chunk.index,
                checksum: chunk.checksum.clone(),
                duration_ms: chunk.duration_ms,
                status: ChunkStatus::Pending,
                attempts: 0,
                last_error: None,
                uploaded_at: None,
            },
        );
        self.save()
    }

    /// Claim a chunk for transfer: Pending -> Uploading, attempts + 1.
    /// Returns the attempt number now underway.
    pub fn mark_uploading(&mut self, chunk_id: &str) -> Result<u32, CourierError> {
        let attempts = {
            let entry = self.entry_mut(chunk_id)?;
            entry.status = ChunkStatus::Uploading;
            entry.attempts += 1;
            entry.attempts
        };
        self.save()?;
        Ok(attempts)
    }

    pub fn mark_uploaded(&mut self, chunk_id: &str) -> Result<(), CourierError> {
        {
            let entry = self.entry_mut(chunk_id)?;
            entry.status = ChunkStatus::Uploaded;
            entry.last_error = None;
            entry.uploaded_at = Some(Utc::now());
        }
        self.save()
    }

    pub fn mark_failed(&mut self, chunk_id: &str, error: &str) -> Result<(), CourierError> {
        {
            let entry = self.entry_mut(chunk_id)?;
            entry.status = ChunkStatus::Failed;
            entry.last_error = Some(error.to_string());
        }
        self.save()
    }

    /// Re-enqueue path for Failed chunks: back to Pending, keeping the
    /// attempt history and last error visible.
    pub fn mark_pending(&mut self, chunk_id: &str) -> Result<(), CourierError> {
        {
            let entry = self.entry_mut(chunk_id)?;
            entry.status = ChunkStatus::Pending;
        }
        self.save()
    }

    pub fn entry(&self, chunk_id: &str) -> Option<ManifestEntry> {
        self.entries
            .values()
            .find(|e| e.chunk_id == chunk_id)
            .cloned()
    }

    pub fn entries_in_order(&self) -> Vec<ManifestEntry> {
        self.entries.values().cloned().collect()
    }

    /// Restart path: any entry left Uploading was never confirmed, flip it
    /// back to Pending, then return all Pending chunk ids in index order.
    /// Failed entries stay put; they re-enter only through an explicit retry.
    pub fn requeue_incomplete(&mut self) -> Result<Vec<String>, CourierError> {
        let mut flipped = false;
        for entry in self.entries.values_mut() {
            if entry.status == ChunkStatus::Uploading {
                entry.status = ChunkStatus::Pending;
                flipped = true;
            }
        }
        if flipped {
            self.save()?;
        }

        Ok(self
            .entries
            .values()
            .filter(|e| e.status == ChunkStatus::Pending)
            .map(|e| e.chunk_id.clone())
            .collect())
    }

    /// Re-register finalized chunk files present on disk but absent from the
    /// manifest, recomputing checksum and size. Files an open writer never
    /// finished are skipped. Returns how many entries were added.
    pub fn recover_from_disk(&mut self) -> Result<usize, CourierError> {
        let mut added = 0;

        for item in fs::read_dir(&self.dir)? {
            let item = item?;
            let file_name = item.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(index) = parse_chunk_index(&self.session_id, name) else {
                continue;
            };
            if self.entries.contains_key(&index) {
                continue;
            }

            let path = item.path();
            let Some(duration_ms) = finalized_wav_duration_ms(&path) else {
                warn!("Skipping unfinalized chunk file {:?}", path);
                continue;
            };

            let checksum = ChunkChecksum::from_file(&path)?;
            let size_bytes = fs::metadata(&path)?.len();
            let chunk_id = format!("{}-chunk-{:05}", self.session_id, index);

            info!("Recovered chunk {} from disk ({} bytes)", chunk_id, size_bytes);
            self.entries.insert(
                index,
                ManifestEntry {
                    chunk_id,
                    path,
                    size_bytes,
                    index,
                    checksum,
                    duration_ms,
                    status: ChunkStatus::Pending,
                    attempts: 0,
                    last_error: None,
                    uploaded_at: None,
                },
            );
            added += 1;
        }

        if added > 0 {
            self.save()?;
        }
        Ok(added)
    }

    pub fn progress(&self) -> UploadProgress {
        let total_bytes: u64 = self.entries.values().map(|e| e.size_bytes).sum();
        let uploaded_bytes: u64 = self
            .entries
            .values()
            .filter(|e| e.status == ChunkStatus::Uploaded)
            .map(|e| e.size_bytes)
            .sum();

        UploadProgress {
            uploaded_bytes,
            total_bytes,
            ratio: if total_bytes == 0 {
                0.0
            } else {
                uploaded_bytes as f64 / total_bytes as f64
            },
        }
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in self.entries.values() {
            match entry.status {
                ChunkStatus::Pending => counts.pending += 1,
                ChunkStatus::Uploading => counts.uploading += 1,
                ChunkStatus::Uploaded => counts.uploaded += 1,
                ChunkStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    fn entry_mut(&mut self, chunk_id: &str) -> Result<&mut ManifestEntry, CourierError> {
        self.entries
            .values_mut()
            .find(|e| e.chunk_id == chunk_id)
            .ok_or_else(|| CourierError::UnknownChunk(chunk_id.to_string()))
    }

    /// Synchronous durable write: serialize to a temp file, fsync, then
    /// atomically rename over the manifest.
    fn save(&self) -> Result<(), CourierError> {
        let file = ManifestFile {
            session_id: self.session_id.clone(),
            entries: self.entries.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &bytes)?;
        File::open(&tmp)?.sync_all()?;
        fs::rename(&tmp, &self.path)?;

        Ok(())
    }
}

/// Media duration of a finished WAV file, or None when the file was never
/// finalized (truncated header or zero samples).
fn finalized_wav_duration_ms(path: &Path) -> Option<u64> {
    let reader = hound::WavReader::open(path).ok()?;
    let spec = reader.spec();
    let frames = reader.duration();
    if frames == 0 || spec.sample_rate == 0 {
        return None;
    }
    Some(frames as u64 * 1000 / spec.sample_rate as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed(session: &str, index: u32, dir: &Path) -> SealedChunk {
        let path = dir.join(format!("{}-chunk-{:05}.wav", session, index));
        SealedChunk {
            chunk_id: format!("{}-chunk-{:05}", session, index),
            session_id: session.to_string(),
            index,
            path,
            size_bytes: 1000 + index as u64,
            checksum: ChunkChecksum::from_bytes(format!("chunk-{}", index).as_bytes()),
            duration_ms: 60_000,
        }
    }

    #[test]
    fn test_transitions_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = UploadManifest::open("rec-a", dir.path()).unwrap();

        manifest.register(&sealed("rec-a", 0, dir.path())).unwrap();
        manifest.register(&sealed("rec-a", 1, dir.path())).unwrap();
        let attempt = manifest.mark_uploading("rec-a-chunk-00000").unwrap();
        assert_eq!(attempt, 1);
        manifest.mark_uploaded("rec-a-chunk-00000").unwrap();

        let reloaded = UploadManifest::open("rec-a", dir.path()).unwrap();
        assert_eq!(reloaded.len(), 2);
        let entry = reloaded.entry("rec-a-chunk-00000").unwrap();
        assert_eq!(entry.status, ChunkStatus::Uploaded);
        assert_eq!(entry.attempts, 1);
        assert!(entry.uploaded_at.is_some());
        let entry = reloaded.entry("rec-a-chunk-00001").unwrap();
        assert_eq!(entry.status, ChunkStatus::Pending);
    }

    #[test]
    fn test_corrupted_manifest_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), b"{not json at all").unwrap();

        let manifest = UploadManifest::open("rec-b", dir.path()).unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_requeue_flips_uploading_and_skips_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = UploadManifest::open("rec-c", dir.path()).unwrap();

        for i in 0..4 {
            manifest.register(&sealed("rec-c", i, dir.path())).unwrap();
        }
        manifest.mark_uploading("rec-c-chunk-00000").unwrap();
        manifest.mark_uploaded("rec-c-chunk-00000").unwrap();
        manifest.mark_uploading("rec-c-chunk-00001").unwrap();
        manifest.mark_uploading("rec-c-chunk-00002").unwrap();
        manifest.mark_failed("rec-c-chunk-00002", "boom").unwrap();

        let requeued = manifest.requeue_incomplete().unwrap();
        assert_eq!(
            requeued,
            vec!["rec-c-chunk-00001".to_string(), "rec-c-chunk-00003".to_string()]
        );
        assert_eq!(
            manifest.entry("rec-c-chunk-00001").unwrap().status,
            ChunkStatus::Pending
        );
        assert_eq!(
            manifest.entry("rec-c-chunk-00002").unwrap().status,
            ChunkStatus::Failed
        );
    }

    #[test]
    fn test_progress_counts_uploaded_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = UploadManifest::open("rec-d", dir.path()).unwrap();

        manifest.register(&sealed("rec-d", 0, dir.path())).unwrap();
        manifest.register(&sealed("rec-d", 1, dir.path())).unwrap();
        manifest.mark_uploading("rec-d-chunk-00000").unwrap();
        manifest.mark_uploaded("rec-d-chunk-00000").unwrap();

        let progress = manifest.progress();
        assert_eq!(progress.uploaded_bytes, 1000);
        assert_eq!(progress.total_bytes, 2001);
        assert!(progress.ratio > 0.0 && progress.ratio < 1.0);
    }
}
