//! API Routes
//!
//! Configures the Axum router with all image service endpoints.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    clear_all_handler, clear_image_handler, encode_handler, force_cleanup_handler,
    health_handler, image_handler, lifecycle_handler, memory_handler, preload_handler,
    stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Middleware
/// - CORS: Allows any origin (the server is meant for local diagnostics)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/images", post(image_handler).delete(clear_image_handler))
        .route("/images/preload", post(preload_handler))
        .route("/cache", delete(clear_all_handler))
        .route("/cleanup", post(force_cleanup_handler))
        .route("/lifecycle", post(lifecycle_handler))
        .route("/encode", post(encode_handler))
        .route("/stats", get(stats_handler))
        .route("/memory", get(memory_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
