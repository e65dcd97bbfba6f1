// Integration tests for the multipart upload protocol
//
// These tests verify part splitting and ordering, abort-on-failure with the
// original error preserved, per-call timeouts, and end-to-end assembly
// against the local filesystem store.

mod common;

use anyhow::Result;
use chunk_courier::error::{FailureClass, RemoteStoreError};
use chunk_courier::upload::{
    object_key, EncryptionMode, FsRemoteStore, MultipartConfig, MultipartUploader,
    ObjectMetadata, RemoteStore,
};
use common::{make_chunk, FailKind, FailStage, ScriptedRemoteStore, TEST_SESSION};
use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn uploader(store: Arc<ScriptedRemoteStore>, part_size: u64) -> MultipartUploader {
    MultipartUploader::new(
        store as Arc<dyn RemoteStore>,
        MultipartConfig {
            part_size_bytes: part_size,
            part_concurrency: 3,
            op_timeout: Duration::from_secs(5),
        },
    )
}

#[tokio::test]
async fn test_chunk_splits_into_exact_parts_completed_in_order() -> Result<()> {
    let dir = TempDir::new()?;
    let store = ScriptedRemoteStore::new();

    // 4.5 MiB over 1 MiB parts: four full parts plus the remainder
    let mib = 1024 * 1024;
    let chunk = make_chunk(dir.path(), TEST_SESSION, 0, 4 * mib + mib / 2);
    let uploader = uploader(Arc::clone(&store), mib as u64);

    uploader.upload_chunk(&chunk, "user/rec/chunk-00000-test").await?;

    assert_eq!(store.initiates.load(Ordering::SeqCst), 1);
    assert_eq!(store.part_uploads.load(Ordering::SeqCst), 5);
    assert_eq!(store.completes.load(Ordering::SeqCst), 1);
    assert_eq!(store.aborts.load(Ordering::SeqCst), 0);

    // Receipts arrive at completion sorted by part number even though the
    // parts themselves went up concurrently
    let completed = store.completed.lock().unwrap();
    assert_eq!(completed[0].1, vec![1, 2, 3, 4, 5]);

    Ok(())
}

#[tokio::test]
async fn test_small_chunk_uses_single_part() -> Result<()> {
    let dir = TempDir::new()?;
    let store = ScriptedRemoteStore::new();

    let chunk = make_chunk(dir.path(), TEST_SESSION, 0, 1024);
    let uploader = uploader(Arc::clone(&store), 5 * 1024 * 1024);

    uploader.upload_chunk(&chunk, "user/rec/chunk-00000-test").await?;

    assert_eq!(store.part_uploads.load(Ordering::SeqCst), 1);
    let completed = store.completed.lock().unwrap();
    assert_eq!(completed[0].1, vec![1]);

    Ok(())
}

#[tokio::test]
async fn test_part_failure_aborts_and_keeps_original_error() -> Result<()> {
    let dir = TempDir::new()?;
    let store = ScriptedRemoteStore::new();
    store.fail_when("chunk-00000", FailStage::Part, Some(1), FailKind::Network);

    let chunk = make_chunk(dir.path(), TEST_SESSION, 0, 4096);
    let uploader = uploader(Arc::clone(&store), 1024);

    let err = uploader
        .upload_chunk(&chunk, "user/rec/chunk-00000-test")
        .await
        .unwrap_err();

    // The network failure is what surfaces, not anything the abort did
    assert!(matches!(err, RemoteStoreError::Network(_)));
    assert_eq!(err.class(), FailureClass::Retryable);
    assert_eq!(store.aborts.load(Ordering::SeqCst), 1);
    assert_eq!(store.completes.load(Ordering::SeqCst), 0);

    Ok(())
}

#[tokio::test]
async fn test_completion_failure_aborts() -> Result<()> {
    let dir = TempDir::new()?;
    let store = ScriptedRemoteStore::new();
    store.fail_when("chunk-00000", FailStage::Complete, Some(1), FailKind::Protocol);

    let chunk = make_chunk(dir.path(), TEST_SESSION, 0, 1024);
    let uploader = uploader(Arc::clone(&store), 1024);

    let err = uploader
        .upload_chunk(&chunk, "user/rec/chunk-00000-test")
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteStoreError::Protocol(_)));
    assert_eq!(store.aborts.load(Ordering::SeqCst), 1);

    Ok(())
}

#[tokio::test]
async fn test_slow_call_times_out_as_transient() -> Result<()> {
    let dir = TempDir::new()?;
    let store = ScriptedRemoteStore::new();
    store.set_part_delay(Duration::from_millis(200));

    let chunk = make_chunk(dir.path(), TEST_SESSION, 0, 1024);
    let uploader = MultipartUploader::new(
        Arc::clone(&store) as Arc<dyn RemoteStore>,
        MultipartConfig {
            part_size_bytes: 1024,
            part_concurrency: 1,
            op_timeout: Duration::from_millis(50),
        },
    );

    let err = uploader
        .upload_chunk(&chunk, "user/rec/chunk-00000-test")
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteStoreError::Timeout(_)));
    assert_eq!(err.class(), FailureClass::Retryable);
    assert_eq!(store.aborts.load(Ordering::SeqCst), 1);

    Ok(())
}

// ============================================================================
// Filesystem store
// ============================================================================

#[tokio::test]
async fn test_fs_store_assembles_parts_in_order() -> Result<()> {
    let chunk_dir = TempDir::new()?;
    let remote_dir = TempDir::new()?;

    let store = Arc::new(FsRemoteStore::new(remote_dir.path())?);
    let kib = 1024;
    let chunk = make_chunk(chunk_dir.path(), TEST_SESSION, 0, 160 * kib);

    let uploader = MultipartUploader::new(
        Arc::clone(&store) as Arc<dyn RemoteStore>,
        MultipartConfig {
            part_size_bytes: 64 * kib as u64,
            part_concurrency: 3,
            op_timeout: Duration::from_secs(5),
        },
    );

    let key = object_key("tester", TEST_SESSION, 0);
    uploader.upload_chunk(&chunk, &key).await?;

    // The assembled object is byte-identical to the chunk file
    let object = remote_dir.path().join(&key);
    assert!(object.exists(), "object should land under its key");
    assert_eq!(fs::read(&object)?, fs::read(&chunk.path)?);

    // Staging leaves nothing behind
    let staging = remote_dir.path().join(".multipart");
    assert_eq!(fs::read_dir(&staging)?.count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_fs_store_rejects_traversal_keys() -> Result<()> {
    let remote_dir = TempDir::new()?;
    let store = FsRemoteStore::new(remote_dir.path())?;

    let metadata = ObjectMetadata {
        checksum_sha256: "00".repeat(32),
        recording_id: TEST_SESSION.to_string(),
        chunk_id: "rec-test-chunk-00000".to_string(),
        chunk_index: 0,
        duration_ms: 1000,
    };

    let err = store
        .initiate_upload("../escape/chunk", &metadata, EncryptionMode::Aes256)
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteStoreError::Validation(_)));

    Ok(())
}

#[tokio::test]
async fn test_fs_store_rejects_receipt_mismatch() -> Result<()> {
    let remote_dir = TempDir::new()?;
    let store = FsRemoteStore::new(remote_dir.path())?;

    let metadata = ObjectMetadata {
        checksum_sha256: "00".repeat(32),
        recording_id: TEST_SESSION.to_string(),
        chunk_id: "rec-test-chunk-00000".to_string(),
        chunk_index: 0,
        duration_ms: 1000,
    };

    let upload = store
        .initiate_upload("tester/rec/chunk-00000-x", &metadata, EncryptionMode::Aes256)
        .await?;
    let mut receipt = store.upload_part(&upload, 1, vec![7u8; 128]).await?;
    receipt.receipt = "forged".to_string();

    let err = store.complete_upload(&upload, &[receipt]).await.unwrap_err();
    assert!(matches!(err, RemoteStoreError::Validation(_)));

    // The object was never published
    assert!(!remote_dir.path().join("tester/rec/chunk-00000-x").exists());

    store.abort_upload(&upload).await?;
    Ok(())
}
