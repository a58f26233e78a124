//! Standard set handlers
//!
//! POST/GET /api/v1/standard-sets, GET/DELETE /api/v1/standard-sets/{id}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::{
    db,
    error::{ApiError, ApiResult},
    models::{StandardSet, StandardSetCreate, StandardSetWithStandards},
    AppState,
};

/// POST /api/v1/standard-sets
///
/// Registers the set (re-registering by name replaces its source) and
/// returns 201 at once; the ingest runs in a background task.
pub async fn create_standard_set(
    State(state): State<AppState>,
    Json(request): Json<StandardSetCreate>,
) -> ApiResult<(StatusCode, Json<StandardSet>)> {
    let set = state.standard_set_processor.register(&request).await?;

    let state_clone = state.clone();
    let set_id = set.id;
    tokio::spawn(async move {
        tracing::info!(standard_set_id = %set_id, "Background ingest task started");

        if let Err(e) = state_clone.standard_set_processor.process(set_id).await {
            tracing::error!(
                standard_set_id = %set_id,
                error = %e,
                "Background ingest task failed"
            );
            state_clone.record_error(e.to_string()).await;
        }
    });

    Ok((StatusCode::CREATED, Json(set)))
}

/// GET /api/v1/standard-sets
pub async fn list_standard_sets(State(state): State<AppState>) -> ApiResult<Json<Vec<StandardSet>>> {
    Ok(Json(db::standard_sets::list_standard_sets(&state.db).await?))
}

/// GET /api/v1/standard-sets/{id}
///
/// Includes the standards of the last committed ingest.
pub async fn get_standard_set(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<StandardSetWithStandards>> {
    let standard_set = db::standard_sets::get_standard_set(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Standard set not found: {}", id)))?;

    let standards = db::standards::list_standards(&state.db, id).await?;

    Ok(Json(StandardSetWithStandards {
        standard_set,
        standards,
    }))
}

/// DELETE /api/v1/standard-sets/{id}
pub async fn delete_standard_set(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    db::standard_sets::delete_standard_set(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Build standard set routes
pub fn standard_set_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/standard-sets",
            get(list_standard_sets).post(create_standard_set),
        )
        .route(
            "/api/v1/standard-sets/:id",
            get(get_standard_set).delete(delete_standard_set),
        )
}
