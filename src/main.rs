use std::sync::Arc;

use anyhow::{Context, Result};
use chunk_courier::capture::{SyntheticConfig, SyntheticSourceFactory};
use chunk_courier::nats::CatalogPublisher;
use chunk_courier::upload::{FsRemoteStore, StaticCredentials};
use chunk_courier::{create_router, AppState, Config};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chunk-courier")]
#[command(about = "Chunked recording capture and upload service")]
struct Args {
    /// Config file path (without extension)
    #[arg(short, long, default_value = "config/chunk-courier")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::load(&args.config)?;

    // Expand home-relative paths before anything touches the filesystem
    config.recording.recordings_dir =
        shellexpand::tilde(&config.recording.recordings_dir).into_owned();
    config.upload.remote_root = shellexpand::tilde(&config.upload.remote_root).into_owned();

    info!("{} starting", config.service.name);
    info!("Recordings directory: {}", config.recording.recordings_dir);
    info!("Remote store root: {}", config.upload.remote_root);

    let remote = Arc::new(
        FsRemoteStore::new(&config.upload.remote_root)
            .context("Failed to initialize remote store")?,
    );
    let credentials = Arc::new(StaticCredentials);
    let sources = Arc::new(SyntheticSourceFactory::new(SyntheticConfig::default()));

    let catalog = if config.nats.enabled {
        Some(Arc::new(CatalogPublisher::connect(&config.nats.url).await?))
    } else {
        None
    };

    let addr = format!("{}:{}", config.service.http.bind, config.service.http.port);
    let state = AppState::new(config, sources, remote, credentials, catalog);
    let app = create_router(state);

    info!("HTTP server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind HTTP listener")?;
    axum::serve(listener, app)
        .await
        .context("HTTP server failed")?;

    Ok(())
}
