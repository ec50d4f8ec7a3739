//! Request and Response models for the image service API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{ClearQuery, EncodeRequest, ImageRequest, LifecycleRequest, PreloadRequest};
pub use responses::{
    ClearResponse, ClearedResponse, HealthResponse, LifecycleResponse, PreloadResponse,
};
