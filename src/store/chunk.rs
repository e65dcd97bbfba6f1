use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::checksum::ChunkChecksum;
use super::disk;
use crate::capture::MediaFrame;
use crate::error::CourierError;

/// Chunk store configuration
#[derive(Debug, Clone)]
pub struct ChunkStoreConfig {
    /// Session ID (used for chunk filenames)
    pub session_id: String,
    /// Directory receiving this session's chunk files
    pub session_dir: PathBuf,
    /// Minimum free bytes required on the volume before opening a chunk;
    /// 0 disables the check
    pub min_free_bytes: u64,
}

/// A fully written, checksummed chunk ready for upload registration.
#[derive(Debug, Clone)]
pub struct SealedChunk {
    pub chunk_id: String,
    pub session_id: String,
    pub index: u32,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub checksum: ChunkChecksum,
    pub duration_ms: u64,
}

pub fn chunk_file_name(session_id: &str, index: u32) -> String {
    format!("{}-chunk-{:05}.wav", session_id, index)
}

/// Inverse of `chunk_file_name`; None for files that are not chunks of this
/// session.
pub fn parse_chunk_index(session_id: &str, file_name: &str) -> Option<u32> {
    let prefix = format!("{}-chunk-", session_id);
    file_name
        .strip_prefix(&prefix)?
        .strip_suffix(".wav")?
        .parse()
        .ok()
}

/// Writes chunk files for one session
///
/// Hands out one writer at a time; the capture loop owns the writer until it
/// finalizes or aborts it.
pub struct ChunkStore {
    config: ChunkStoreConfig,
}

impl ChunkStore {
    pub fn new(config: ChunkStoreConfig) -> Result<Self, CourierError> {
        fs::create_dir_all(&config.session_dir)?;

        info!(
            "Chunk store initialized for {} at {:?}",
            config.session_id, config.session_dir
        );

        Ok(Self { config })
    }

    pub fn session_dir(&self) -> &Path {
        &self.config.session_dir
    }

    /// Open the writer for chunk `index`, verifying free disk space first.
    pub fn start_chunk(
        &self,
        index: u32,
        first_frame: &MediaFrame,
    ) -> Result<ChunkWriter, CourierError> {
        disk::ensure_free_space(&self.config.session_dir, self.config.min_free_bytes)?;

        let path = self
            .config
            .session_dir
            .join(chunk_file_name(&self.config.session_id, index));

        ChunkWriter::create(
            self.config.session_id.clone(),
            path,
            index,
            first_frame.timestamp_ms,
            first_frame.sample_rate,
            first_frame.channels,
        )
    }
}

/// Writes a single chunk to disk as a WAV file
pub struct ChunkWriter {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    session_id: String,
    chunk_id: String,
    path: PathBuf,
    index: u32,
    start_ms: u64,
    sample_rate: u32,
    channels: u16,
    sample_count: usize,
}

// Manual impl because `hound::WavWriter` is not `Debug`
impl std::fmt::Debug for ChunkWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkWriter")
            .field("session_id", &self.session_id)
            .field("chunk_id", &self.chunk_id)
            .field("path", &self.path)
            .field("index", &self.index)
            .field("start_ms", &self.start_ms)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("sample_count", &self.sample_count)
            .finish_non_exhaustive()
    }
}

impl ChunkWriter {
    fn create(
        session_id: String,
        path: PathBuf,
        index: u32,
        start_ms: u64,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, CourierError> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&path, spec)?;
        let chunk_id = format!("{}-chunk-{:05}", session_id, index);

        Ok(Self {
            writer: Some(writer),
            session_id,
            chunk_id,
            path,
            index,
            start_ms,
            sample_rate,
            channels,
            sample_count: 0,
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn start_ms(&self) -> u64 {
        self.start_ms
    }

    pub fn write_frame(&mut self, frame: &MediaFrame) -> Result<(), CourierError> {
        if let Some(writer) = &mut self.writer {
            for &sample in &frame.samples {
                writer.write_sample(sample)?;
            }
            self.sample_count += frame.samples.len();
        }

        Ok(())
    }

    /// Seal the chunk: flush and close the file, fsync it, then checksum
    /// the closed file and stat its size.
    pub fn finalize(mut self) -> Result<SealedChunk, CourierError> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }

        // Re-open read-only purely to fsync the finished file
        File::open(&self.path)?.sync_all()?;

        let checksum = ChunkChecksum::from_file(&self.path)?;
        let size_bytes = fs::metadata(&self.path)?.len();
        let duration_ms = if self.sample_rate > 0 && self.channels > 0 {
            (self.sample_count as u64 / self.channels as u64) * 1000 / self.sample_rate as u64
        } else {
            0
        };

        Ok(SealedChunk {
            chunk_id: self.chunk_id.clone(),
            session_id: self.session_id.clone(),
            index: self.index,
            path: self.path.clone(),
            size_bytes,
            checksum,
            duration_ms,
        })
    }

    /// Discard the in-progress chunk, deleting the partial file. Used when a
    /// write fails mid-chunk; already-sealed chunks are unaffected.
    pub fn abort(mut self) {
        // Dropping the inner writer closes the file handle before removal
        self.writer.take();

        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove aborted chunk {:?}: {}", self.path, e);
        } else {
            warn!("Aborted chunk {} ({:?})", self.chunk_id, self.path);
        }
    }
}

impl Drop for ChunkWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}
