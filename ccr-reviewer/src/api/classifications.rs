//! Classification vocabulary handlers
//!
//! POST/GET /api/v1/classifications, DELETE /api/v1/classifications/{id}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use uuid::Uuid;

use crate::{db, error::ApiResult, models::{Classification, ClassificationCreate}, AppState};

/// POST /api/v1/classifications
pub async fn create_classification(
    State(state): State<AppState>,
    Json(request): Json<ClassificationCreate>,
) -> ApiResult<(StatusCode, Json<Classification>)> {
    let classification = db::classifications::create_classification(&state.db, &request.name).await?;
    Ok((StatusCode::CREATED, Json(classification)))
}

/// GET /api/v1/classifications
pub async fn list_classifications(State(state): State<AppState>) -> ApiResult<Json<Vec<Classification>>> {
    Ok(Json(db::classifications::list_classifications(&state.db).await?))
}

/// DELETE /api/v1/classifications/{id}
///
/// 409 while any standard is tagged with it.
pub async fn delete_classification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    db::classifications::delete_classification(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Build classification routes
pub fn classification_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/classifications",
            get(list_classifications).post(create_classification),
        )
        .route("/api/v1/classifications/:id", delete(delete_classification))
}
