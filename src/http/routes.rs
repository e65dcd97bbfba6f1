use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Recording control
        .route("/recordings/start", post(handlers::start_recording))
        .route(
            "/recordings/:recording_id/stop",
            post(handlers::stop_recording),
        )
        .route(
            "/recordings/:recording_id/pause",
            post(handlers::pause_recording),
        )
        .route(
            "/recordings/:recording_id/resume",
            post(handlers::resume_recording),
        )
        // Recording queries
        .route(
            "/recordings/:recording_id/status",
            get(handlers::get_recording_status),
        )
        .route(
            "/recordings/:recording_id/chunks",
            get(handlers::list_chunks),
        )
        // Upload control
        .route(
            "/recordings/:recording_id/chunks/:chunk_id/retry",
            post(handlers::retry_chunk),
        )
        .route(
            "/recordings/:recording_id/uploads/pause",
            post(handlers::pause_uploads),
        )
        .route(
            "/recordings/:recording_id/uploads/resume",
            post(handlers::resume_uploads),
        )
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
