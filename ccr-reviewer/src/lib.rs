//! ccr-reviewer library interface
//!
//! Exposes the pipeline, persistence and HTTP layers for the binary and for
//! integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use ccr_common::events::EventBus;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::services::{ComplianceProcessor, StandardSetProcessor};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub standard_set_processor: Arc<StandardSetProcessor>,
    pub compliance_processor: Arc<ComplianceProcessor>,
    /// Cancellation tokens for reviews still running
    pub cancellation_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last background failure, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        standard_set_processor: Arc<StandardSetProcessor>,
        compliance_processor: Arc<ComplianceProcessor>,
    ) -> Self {
        Self {
            db,
            event_bus,
            standard_set_processor,
            compliance_processor,
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Cancel every running review
    pub async fn cancel_all(&self) -> usize {
        let tokens = self.cancellation_tokens.read().await;
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    pub(crate) async fn record_error(&self, message: String) {
        *self.last_error.write().await = Some(message);
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use tower_http::trace::TraceLayer;

    Router::new()
        .merge(api::health_routes())
        .merge(api::classification_routes())
        .merge(api::standard_set_routes())
        .merge(api::code_review_routes())
        .merge(api::event_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
