//! onboard-api library interface
//!
//! Exposes the router, state and building blocks for integration testing

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod extraction;
pub mod pagination;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::UploadLimits;
use crate::extraction::ExtractionPipeline;

/// Multipart framing overhead allowed on top of the file payloads
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Per-file extraction with fallback
    pub pipeline: Arc<ExtractionPipeline>,
    /// Upload acceptance rules
    pub uploads: Arc<UploadLimits>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, pipeline: ExtractionPipeline, uploads: UploadLimits) -> Self {
        Self {
            db,
            pipeline: Arc::new(pipeline),
            uploads: Arc::new(uploads),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Remember an error for the health endpoint
    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Largest accepted request body: every file at its maximum plus framing
pub fn request_body_limit(uploads: &UploadLimits) -> usize {
    uploads
        .max_file_size
        .saturating_mul(uploads.max_files)
        .saturating_add(MULTIPART_OVERHEAD)
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let body_limit = request_body_limit(&state.uploads);

    Router::new()
        .merge(api::health_routes())
        .nest(
            "/api/v2",
            api::document_routes().merge(api::application_routes()),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
