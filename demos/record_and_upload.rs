// Example: Record a synthetic tone in chunks and upload every chunk
//
// This example demonstrates the complete pipeline:
// 1. Create a synthetic capture source (no microphone needed)
// 2. Rotate the stream into 60-second WAV chunks
// 3. Register each sealed chunk in the session manifest
// 4. Upload chunks through the multipart protocol to a local object store
//
// The source generates media faster than real time, so a three-minute
// recording finishes in moments.
//
// Usage: cargo run --example record_and_upload -- --media-secs 180

use anyhow::Result;
use chunk_courier::capture::{SyntheticConfig, SyntheticSource};
use chunk_courier::pipeline::{PipelineConfig, RecordingPipeline};
use chunk_courier::upload::{FsRemoteStore, MultipartConfig, QueueConfig, StaticCredentials};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "record_and_upload")]
#[command(about = "Record synthetic audio in chunks and upload them")]
struct Args {
    /// Seconds of media to generate
    #[arg(short, long, default_value = "180")]
    media_secs: u64,

    /// Chunk duration in seconds
    #[arg(short, long, default_value = "60")]
    chunk_secs: u64,

    /// Recording ID (used for chunk filenames and object keys)
    #[arg(short, long, default_value = "demo-recording")]
    recording_id: String,

    /// Directory receiving chunk files
    #[arg(short, long, default_value = "~/.chunk-courier/recordings")]
    output_dir: String,

    /// Directory backing the local object store
    #[arg(long, default_value = "~/.chunk-courier/remote")]
    remote_dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let args = Args::parse();

    info!("Chunk Courier - Record and Upload Example");
    info!("Media: {} seconds", args.media_secs);
    info!("Chunk duration: {} seconds", args.chunk_secs);
    info!("Recording ID: {}", args.recording_id);

    // Expand home directory
    let output_dir = PathBuf::from(shellexpand::tilde(&args.output_dir).as_ref());
    let remote_dir = PathBuf::from(shellexpand::tilde(&args.remote_dir).as_ref());

    info!("Chunk directory: {}", output_dir.display());
    info!("Object store root: {}", remote_dir.display());

    let remote = Arc::new(FsRemoteStore::new(&remote_dir)?);
    let credentials = Arc::new(StaticCredentials);

    let config = PipelineConfig {
        session_id: args.recording_id.clone(),
        user_id: "demo-user".to_string(),
        recordings_dir: output_dir,
        chunk_duration: Duration::from_secs(args.chunk_secs),
        min_free_disk_bytes: 0,
        queue: QueueConfig::default(),
        multipart: MultipartConfig::default(),
    };

    let pipeline = RecordingPipeline::new(config, remote, credentials)?;

    // Print every pipeline event as it happens
    let mut events = pipeline.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                info!("event: {}", json);
            }
        }
    });

    // Generate the whole recording faster than real time
    let source = SyntheticSource::new(SyntheticConfig {
        total_duration_ms: Some(args.media_secs * 1000),
        ..SyntheticConfig::default()
    });

    info!("Starting recording...");
    pipeline.start(Box::new(source)).await?;

    // Every full chunk seals when a frame crosses its boundary; the last
    // stretch of media stays open until stop
    let full_chunks = (args.media_secs.saturating_sub(1) / args.chunk_secs) as u32;
    while pipeline.stats().await.chunks_sealed < full_chunks {
        sleep(Duration::from_millis(50)).await;
    }

    let expected = pipeline.stop().await?;
    info!("Recording stopped, {} chunks to upload", expected);

    // Wait for the queue to drain
    let counts = tokio::time::timeout(Duration::from_secs(60), pipeline.drain()).await?;
    info!(
        "Uploads settled: {} uploaded, {} failed",
        counts.uploaded, counts.failed
    );

    for entry in pipeline.chunks().await {
        info!(
            "  chunk {:05}: {:?} ({} bytes, {} attempts)",
            entry.index, entry.status, entry.size_bytes, entry.attempts
        );
    }

    let progress = pipeline.progress().await;
    info!(
        "Final progress: {}/{} bytes ({:.0}%)",
        progress.uploaded_bytes,
        progress.total_bytes,
        progress.ratio * 100.0
    );

    Ok(())
}
