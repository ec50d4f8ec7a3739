//! API Handlers
//!
//! HTTP request handlers for each image service endpoint.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use tracing::debug;

use crate::cache::{CacheStats, CachedImage};
use crate::error::{ImageError, Result};
use crate::memory::MemoryUsage;
use crate::models::{
    ClearQuery, ClearResponse, ClearedResponse, EncodeRequest, HealthResponse, ImageRequest,
    LifecycleRequest, LifecycleResponse, PreloadRequest, PreloadResponse,
};
use crate::service::ImageService;
use crate::transform::TransportImage;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ImageService>,
}

impl AppState {
    /// Creates a new AppState around an existing service.
    pub fn new(service: ImageService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }

    /// Creates a new AppState from configuration.
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(ImageService::from_config(config))
    }
}

/// Handler for POST /images
///
/// Returns a cached reference, loading and compressing the image on a miss.
pub async fn image_handler(
    State(state): State<AppState>,
    Json(req): Json<ImageRequest>,
) -> Result<Json<CachedImage>> {
    if let Some(error_msg) = req.validate() {
        return Err(ImageError::InvalidRequest(error_msg));
    }

    let image = state
        .service
        .cache
        .get_cached_image(&req.uri, &req.options)
        .await?;
    Ok(Json(image))
}

/// Handler for POST /images/preload
///
/// Queues the URIs for background loading and returns immediately.
pub async fn preload_handler(
    State(state): State<AppState>,
    Json(req): Json<PreloadRequest>,
) -> Result<(StatusCode, Json<PreloadResponse>)> {
    if let Some(error_msg) = req.validate() {
        return Err(ImageError::InvalidRequest(error_msg));
    }

    let accepted = req.uris.len();
    let cache = state.service.cache.clone();
    tokio::spawn(async move {
        let report = cache.preload_images(req.uris, &req.options).await;
        debug!(
            "Background preload: {} loaded, {} failed",
            report.loaded, report.failed
        );
    });

    Ok((StatusCode::ACCEPTED, Json(PreloadResponse::new(accepted))))
}

/// Handler for DELETE /images?key=
pub async fn clear_image_handler(
    State(state): State<AppState>,
    Query(query): Query<ClearQuery>,
) -> Result<Json<ClearResponse>> {
    if query.key.is_empty() {
        return Err(ImageError::InvalidRequest("Key cannot be empty".to_string()));
    }

    let removed = state.service.cache.clear_image(&query.key).await;
    Ok(Json(ClearResponse::new(query.key, removed)))
}

/// Handler for DELETE /cache
pub async fn clear_all_handler(State(state): State<AppState>) -> Json<ClearedResponse> {
    let cleared = state.service.cache.clear_all().await;
    Json(ClearedResponse::new(cleared))
}

/// Handler for POST /cleanup
///
/// Drops every entry, releases temp resources and resets the accountant.
pub async fn force_cleanup_handler(State(state): State<AppState>) -> Json<ClearedResponse> {
    let cleared = state.service.lifecycle.force_cleanup().await;
    Json(ClearedResponse::new(cleared))
}

/// Handler for POST /lifecycle
pub async fn lifecycle_handler(
    State(state): State<AppState>,
    Json(req): Json<LifecycleRequest>,
) -> Json<LifecycleResponse> {
    let lifecycle = &state.service.lifecycle;
    lifecycle.on_visibility_change(req.state);

    Json(LifecycleResponse {
        state: lifecycle.visibility(),
        pending_cleanup: lifecycle.has_pending_cleanup(),
    })
}

/// Handler for POST /encode
///
/// Returns the image base64-encoded for transport.
pub async fn encode_handler(
    State(state): State<AppState>,
    Json(req): Json<EncodeRequest>,
) -> Result<Json<TransportImage>> {
    if req.uri.trim().is_empty() {
        return Err(ImageError::InvalidRequest("URI cannot be empty".to_string()));
    }

    let image = state
        .service
        .transformer
        .to_transport_encoding(&req.uri, req.format)
        .await?;
    Ok(Json(image))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.service.cache.stats().await)
}

/// Handler for GET /memory
pub async fn memory_handler(State(state): State<AppState>) -> Json<MemoryUsage> {
    Json(state.service.accountant.usage())
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let service = &state.service;
    let warning_percent = service.accountant.warning_threshold() * 100.0;
    Json(HealthResponse::from_snapshot(
        service.snapshot().await,
        warning_percent,
    ))
}
