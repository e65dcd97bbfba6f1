use super::state::AppState;
use crate::error::CourierError;
use crate::manifest::ManifestEntry;
use crate::nats;
use crate::pipeline::{PipelineConfig, PipelineStats, RecordingPipeline};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartRecordingRequest {
    /// Optional recording ID (if not provided, generate UUID)
    pub recording_id: Option<String>,

    /// Chunk duration in seconds (default from service config)
    pub chunk_duration_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct StartRecordingResponse {
    pub recording_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StopRecordingResponse {
    pub recording_id: String,
    pub status: String,
    pub expected_chunks: u32,
    pub stats: PipelineStats,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub recording_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ResumeUploadsResponse {
    pub recording_id: String,
    pub status: String,
    pub requeued: usize,
}

#[derive(Debug, Serialize)]
pub struct ChunkListResponse {
    pub recording_id: String,
    pub chunks: Vec<ManifestEntry>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_status(e: &CourierError) -> StatusCode {
    match e {
        CourierError::InvalidState { .. } => StatusCode::CONFLICT,
        CourierError::UnknownChunk(_) => StatusCode::NOT_FOUND,
        CourierError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        CourierError::InsufficientDiskSpace { .. } => StatusCode::INSUFFICIENT_STORAGE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: &CourierError) -> Response {
    (
        error_status(e),
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

fn not_found(recording_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("Recording {} not found", recording_id),
        }),
    )
        .into_response()
}

async fn find_pipeline(state: &AppState, recording_id: &str) -> Option<Arc<RecordingPipeline>> {
    state.pipelines.read().await.get(recording_id).cloned()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /recordings/start
/// Start a new recording pipeline
pub async fn start_recording(
    State(state): State<AppState>,
    Json(req): Json<StartRecordingRequest>,
) -> impl IntoResponse {
    // Generate or use provided recording ID
    let recording_id = req
        .recording_id
        .unwrap_or_else(|| format!("rec-{}", uuid::Uuid::new_v4()));

    info!("Starting recording: {}", recording_id);

    // Check if already known
    {
        let pipelines = state.pipelines.read().await;
        if pipelines.contains_key(&recording_id) {
            return (
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    error: format!("Recording {} already exists", recording_id),
                }),
            )
                .into_response();
        }
    }

    let mut config = PipelineConfig::from_config(&state.config, &recording_id);
    if let Some(secs) = req.chunk_duration_secs {
        config.chunk_duration = std::time::Duration::from_secs(secs);
    }

    let pipeline = match RecordingPipeline::new(
        config,
        Arc::clone(&state.remote),
        Arc::clone(&state.credentials),
    ) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            error!("Failed to create pipeline: {}", e);
            return error_response(&e);
        }
    };

    // Mirror chunk announcements onto the catalog when NATS is wired in
    if let Some(catalog) = &state.catalog {
        nats::spawn_event_forwarder(Arc::clone(catalog), pipeline.subscribe());
    }

    let source = match state.sources.create() {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create capture source: {}", e);
            return error_response(&e);
        }
    };

    if let Err(e) = pipeline.start(source).await {
        error!("Failed to start recording: {}", e);
        return error_response(&e);
    }

    {
        let mut pipelines = state.pipelines.write().await;
        pipelines.insert(recording_id.clone(), pipeline);
    }

    info!("Recording started: {}", recording_id);

    (
        StatusCode::OK,
        Json(StartRecordingResponse {
            recording_id: recording_id.clone(),
            status: "recording".to_string(),
            message: format!("Recording started for {}", recording_id),
        }),
    )
        .into_response()
}

/// POST /recordings/:recording_id/stop
/// Stop capture; uploads keep draining, so the pipeline stays registered
pub async fn stop_recording(
    State(state): State<AppState>,
    Path(recording_id): Path<String>,
) -> impl IntoResponse {
    info!("Stopping recording: {}", recording_id);

    let pipeline = match find_pipeline(&state, &recording_id).await {
        Some(p) => p,
        None => return not_found(&recording_id),
    };

    match pipeline.stop().await {
        Ok(expected_chunks) => {
            info!(
                "Recording {} stopped ({} chunks expected)",
                recording_id, expected_chunks
            );
            (
                StatusCode::OK,
                Json(StopRecordingResponse {
                    recording_id,
                    status: "stopped".to_string(),
                    expected_chunks,
                    stats: pipeline.stats().await,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to stop recording: {}", e);
            error_response(&e)
        }
    }
}

/// POST /recordings/:recording_id/pause
pub async fn pause_recording(
    State(state): State<AppState>,
    Path(recording_id): Path<String>,
) -> impl IntoResponse {
    let pipeline = match find_pipeline(&state, &recording_id).await {
        Some(p) => p,
        None => return not_found(&recording_id),
    };

    match pipeline.pause() {
        Ok(()) => (
            StatusCode::OK,
            Json(AckResponse {
                recording_id,
                status: "paused".to_string(),
                message: "Recording paused".to_string(),
            }),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /recordings/:recording_id/resume
pub async fn resume_recording(
    State(state): State<AppState>,
    Path(recording_id): Path<String>,
) -> impl IntoResponse {
    let pipeline = match find_pipeline(&state, &recording_id).await {
        Some(p) => p,
        None => return not_found(&recording_id),
    };

    match pipeline.resume() {
        Ok(()) => (
            StatusCode::OK,
            Json(AckResponse {
                recording_id,
                status: "recording".to_string(),
                message: "Recording resumed".to_string(),
            }),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /recordings/:recording_id/status
pub async fn get_recording_status(
    State(state): State<AppState>,
    Path(recording_id): Path<String>,
) -> impl IntoResponse {
    match find_pipeline(&state, &recording_id).await {
        Some(pipeline) => (StatusCode::OK, Json(pipeline.stats().await)).into_response(),
        None => not_found(&recording_id),
    }
}

/// GET /recordings/:recording_id/chunks
/// List every chunk the manifest knows with its upload status
pub async fn list_chunks(
    State(state): State<AppState>,
    Path(recording_id): Path<String>,
) -> impl IntoResponse {
    match find_pipeline(&state, &recording_id).await {
        Some(pipeline) => (
            StatusCode::OK,
            Json(ChunkListResponse {
                chunks: pipeline.chunks().await,
                recording_id,
            }),
        )
            .into_response(),
        None => not_found(&recording_id),
    }
}

/// POST /recordings/:recording_id/chunks/:chunk_id/retry
/// Re-enqueue a chunk that exhausted its upload attempts
pub async fn retry_chunk(
    State(state): State<AppState>,
    Path((recording_id, chunk_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let pipeline = match find_pipeline(&state, &recording_id).await {
        Some(p) => p,
        None => return not_found(&recording_id),
    };

    match pipeline.retry_chunk(&chunk_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(AckResponse {
                recording_id,
                status: "pending".to_string(),
                message: format!("Chunk {} re-enqueued", chunk_id),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to retry chunk {}: {}", chunk_id, e);
            error_response(&e)
        }
    }
}

/// POST /recordings/:recording_id/uploads/pause
pub async fn pause_uploads(
    State(state): State<AppState>,
    Path(recording_id): Path<String>,
) -> impl IntoResponse {
    match find_pipeline(&state, &recording_id).await {
        Some(pipeline) => {
            pipeline.pause_uploads();
            (
                StatusCode::OK,
                Json(AckResponse {
                    recording_id,
                    status: "uploads_paused".to_string(),
                    message: "In-flight uploads will finish; no new chunks start".to_string(),
                }),
            )
                .into_response()
        }
        None => not_found(&recording_id),
    }
}

/// POST /recordings/:recording_id/uploads/resume
pub async fn resume_uploads(
    State(state): State<AppState>,
    Path(recording_id): Path<String>,
) -> impl IntoResponse {
    let pipeline = match find_pipeline(&state, &recording_id).await {
        Some(p) => p,
        None => return not_found(&recording_id),
    };

    match pipeline.resume_uploads().await {
        Ok(requeued) => (
            StatusCode::OK,
            Json(ResumeUploadsResponse {
                recording_id,
                status: "uploads_resumed".to_string(),
                requeued,
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to resume uploads: {}", e);
            error_response(&e)
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
