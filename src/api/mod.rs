//! API Module
//!
//! HTTP handlers and routing for local image-service diagnostics.
//!
//! # Endpoints
//! - `POST /images` - Get a cached (possibly compressed) image reference
//! - `POST /images/preload` - Queue images for background loading
//! - `DELETE /images?key=` - Clear one cached image
//! - `DELETE /cache` - Clear every cached image
//! - `POST /cleanup` - Force a full cleanup
//! - `POST /lifecycle` - Report an app visibility change
//! - `POST /encode` - Base64-encode an image for transport
//! - `GET /stats`, `GET /memory`, `GET /health` - Diagnostics

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
