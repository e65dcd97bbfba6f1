//! HTTP API server for external recording control
//!
//! This module provides a REST API for driving recording pipelines:
//! - POST /recordings/start - Start a new recording
//! - POST /recordings/:id/stop - Stop capture (uploads keep draining)
//! - POST /recordings/:id/pause - Pause capture
//! - POST /recordings/:id/resume - Resume capture
//! - GET /recordings/:id/status - Query pipeline status
//! - GET /recordings/:id/chunks - List chunks with upload status
//! - POST /recordings/:id/chunks/:chunk_id/retry - Re-enqueue a failed chunk
//! - POST /recordings/:id/uploads/pause - Stop claiming new uploads
//! - POST /recordings/:id/uploads/resume - Resume and requeue owed chunks
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
