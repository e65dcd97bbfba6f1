use std::sync::Arc;

use anyhow::{Context, Result};
use async_nats::Client;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::messages::{ChunkFailedMessage, ChunkUploadedMessage, SessionStoppedMessage};
use crate::events::PipelineEvent;

/// Publishes chunk lifecycle announcements to the recording catalog.
pub struct CatalogPublisher {
    client: Client,
}

impl CatalogPublisher {
    /// Connect to NATS server
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self { client })
    }

    pub async fn publish_chunk_uploaded(&self, message: &ChunkUploadedMessage) -> Result<()> {
        let subject = format!("recordings.{}.chunk.uploaded", message.session_id);
        self.publish(subject, message).await
    }

    pub async fn publish_chunk_failed(&self, message: &ChunkFailedMessage) -> Result<()> {
        let subject = format!("recordings.{}.chunk.failed", message.session_id);
        self.publish(subject, message).await
    }

    pub async fn publish_session_stopped(&self, message: &SessionStoppedMessage) -> Result<()> {
        let subject = format!("recordings.{}.stopped", message.session_id);
        self.publish(subject, message).await
    }

    async fn publish<T: serde::Serialize>(&self, subject: String, message: &T) -> Result<()> {
        let payload = serde_json::to_vec(message)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish catalog message")?;

        info!("Published catalog message to {}", subject);

        Ok(())
    }
}

/// Bridge pipeline events onto the catalog subjects. Runs until the event
/// bus closes; a lagged receiver drops the missed events and keeps going.
pub fn spawn_event_forwarder(
    publisher: Arc<CatalogPublisher>,
    mut events: broadcast::Receiver<PipelineEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Catalog forwarder lagged, {} events skipped", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let result = match event {
                PipelineEvent::ChunkUploaded {
                    session_id,
                    chunk_id,
                    chunk_index,
                    size_bytes,
                    attempts,
                } => {
                    publisher
                        .publish_chunk_uploaded(&ChunkUploadedMessage {
                            session_id,
                            chunk_id,
                            chunk_index,
                            size_bytes,
                            attempts,
                            timestamp: chrono::Utc::now().to_rfc3339(),
                        })
                        .await
                }
                PipelineEvent::ChunkFailed {
                    session_id,
                    chunk_id,
                    chunk_index,
                    attempts,
                    error,
                } => {
                    publisher
                        .publish_chunk_failed(&ChunkFailedMessage {
                            session_id,
                            chunk_id,
                            chunk_index,
                            attempts,
                            error,
                            timestamp: chrono::Utc::now().to_rfc3339(),
                        })
                        .await
                }
                PipelineEvent::SessionStopped {
                    session_id,
                    expected_chunks,
                    timestamp,
                } => {
                    publisher
                        .publish_session_stopped(&SessionStoppedMessage {
                            session_id,
                            expected_chunks,
                            timestamp: timestamp.to_rfc3339(),
                        })
                        .await
                }
                _ => Ok(()),
            };

            if let Err(e) = result {
                warn!("Catalog publish failed: {}", e);
            }
        }
    })
}
