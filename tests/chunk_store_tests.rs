// Integration tests for chunk file writing and sealing
//
// These tests verify that sealed chunks are valid WAV files whose recorded
// size, duration, and checksum describe the bytes actually on disk.

mod common;

use anyhow::Result;
use chunk_courier::error::CourierError;
use chunk_courier::store::{disk, ChunkChecksum, ChunkStore, ChunkStoreConfig};
use common::{frame_at, TEST_SESSION};
use std::fs;
use tempfile::TempDir;

fn store(dir: &TempDir, min_free_bytes: u64) -> ChunkStore {
    ChunkStore::new(ChunkStoreConfig {
        session_id: TEST_SESSION.to_string(),
        session_dir: dir.path().join(TEST_SESSION),
        min_free_bytes,
    })
    .unwrap()
}

#[tokio::test]
async fn test_sealed_chunk_is_a_valid_wav() -> Result<()> {
    let dir = TempDir::new()?;
    let store = store(&dir, 0);

    // One second of 16kHz mono media in 100ms frames
    let first = frame_at(0, 100);
    let mut writer = store.start_chunk(0, &first)?;
    for i in 0..10u64 {
        writer.write_frame(&frame_at(i * 100, 100))?;
    }
    let sealed = writer.finalize()?;

    assert_eq!(sealed.index, 0);
    assert_eq!(sealed.chunk_id, "rec-test-chunk-00000");
    assert_eq!(sealed.duration_ms, 1000);
    assert_eq!(sealed.size_bytes, fs::metadata(&sealed.path)?.len());
    assert!(sealed.size_bytes > 44, "WAV header plus samples");

    // The finalized file parses as WAV and carries every sample
    let reader = hound::WavReader::open(&sealed.path)?;
    assert_eq!(reader.spec().sample_rate, 16_000);
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.duration(), 16_000);

    Ok(())
}

#[tokio::test]
async fn test_checksum_covers_the_closed_file() -> Result<()> {
    let dir = TempDir::new()?;
    let store = store(&dir, 0);

    let mut writer = store.start_chunk(0, &frame_at(0, 100))?;
    writer.write_frame(&frame_at(0, 100))?;
    let sealed = writer.finalize()?;

    // Recomputing over the file on disk reproduces the sealed checksum
    assert_eq!(ChunkChecksum::from_file(&sealed.path)?, sealed.checksum);

    // Any change to the bytes breaks the match
    let mut bytes = fs::read(&sealed.path)?;
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&sealed.path, &bytes)?;
    assert_ne!(ChunkChecksum::from_file(&sealed.path)?, sealed.checksum);

    Ok(())
}

#[tokio::test]
async fn test_disk_floor_blocks_new_chunks() -> Result<()> {
    let dir = TempDir::new()?;

    // Only meaningful where disk stats resolve for the temp volume
    if disk::probe_available(dir.path()).is_none() {
        return Ok(());
    }

    let store = store(&dir, u64::MAX);
    let err = store.start_chunk(0, &frame_at(0, 100)).unwrap_err();
    assert!(matches!(
        err,
        CourierError::InsufficientDiskSpace { .. }
    ));

    // No partial file is left behind
    assert_eq!(
        fs::read_dir(dir.path().join(TEST_SESSION))?.count(),
        0,
        "refused chunk should not create a file"
    );

    Ok(())
}

#[tokio::test]
async fn test_zero_floor_disables_disk_check() -> Result<()> {
    let dir = TempDir::new()?;
    let store = store(&dir, 0);

    let writer = store.start_chunk(0, &frame_at(0, 100))?;
    let sealed = writer.finalize()?;
    assert!(sealed.path.exists());

    Ok(())
}

#[tokio::test]
async fn test_aborted_chunk_removes_partial_file() -> Result<()> {
    let dir = TempDir::new()?;
    let store = store(&dir, 0);

    let mut writer = store.start_chunk(0, &frame_at(0, 100))?;
    writer.write_frame(&frame_at(0, 100))?;

    let path = dir.path().join(TEST_SESSION).join("rec-test-chunk-00000.wav");
    assert!(path.exists());

    writer.abort();
    assert!(!path.exists(), "aborted chunk file should be deleted");

    Ok(())
}
