//! Code review handlers
//!
//! POST/GET /api/v1/code-reviews, GET /api/v1/code-reviews/{id},
//! POST /api/v1/code-reviews/{id}/cancel

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    db,
    error::{ApiError, ApiResult},
    models::{CodeReview, CodeReviewCreate, ReviewStatus},
    AppState,
};

/// GET /api/v1/code-reviews query
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

/// POST /api/v1/code-reviews/{id}/cancel response
#[derive(Debug, Serialize)]
pub struct CancelReviewResponse {
    pub review_id: Uuid,
    pub cancelled: bool,
}

/// POST /api/v1/code-reviews
///
/// Returns the review in `started`; processing runs in a background task.
pub async fn create_code_review(
    State(state): State<AppState>,
    Json(request): Json<CodeReviewCreate>,
) -> ApiResult<(StatusCode, Json<CodeReview>)> {
    let review = state.compliance_processor.create_review(&request).await?;

    let token = CancellationToken::new();
    state
        .cancellation_tokens
        .write()
        .await
        .insert(review.id, token.clone());

    let state_clone = state.clone();
    let review_id = review.id;
    tokio::spawn(async move {
        tracing::info!(review_id = %review_id, "Background review task started");

        match state_clone.compliance_processor.run(review_id, token).await {
            Ok(review) => tracing::info!(
                review_id = %review_id,
                reports = review.compliance_reports.len(),
                "Background review task completed"
            ),
            Err(e) => {
                tracing::error!(review_id = %review_id, error = %e, "Background review task failed");
                state_clone.record_error(e.to_string()).await;
            }
        }

        state_clone.cancellation_tokens.write().await.remove(&review_id);
    });

    Ok((StatusCode::CREATED, Json(review)))
}

/// GET /api/v1/code-reviews?status=
pub async fn list_code_reviews(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<CodeReview>>> {
    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<ReviewStatus>())
        .transpose()
        .map_err(ApiError::BadRequest)?;

    Ok(Json(db::code_reviews::list_code_reviews(&state.db, status).await?))
}

/// GET /api/v1/code-reviews/{id}
pub async fn get_code_review(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CodeReview>> {
    let review = db::code_reviews::get_code_review(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Code review not found: {}", id)))?;

    Ok(Json(review))
}

/// POST /api/v1/code-reviews/{id}/cancel
///
/// 409 when the review has already finished.
pub async fn cancel_code_review(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CancelReviewResponse>> {
    let review = db::code_reviews::get_code_review(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Code review not found: {}", id)))?;

    if review.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "Code review already {}",
            review.status
        )));
    }

    let token = state.cancellation_tokens.read().await.get(&id).cloned();
    let Some(token) = token else {
        return Err(ApiError::Conflict(format!(
            "Code review {} is not running in this process",
            id
        )));
    };

    token.cancel();
    tracing::info!(review_id = %id, "Code review cancellation requested");

    Ok(Json(CancelReviewResponse {
        review_id: id,
        cancelled: true,
    }))
}

/// Build code review routes
pub fn code_review_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/code-reviews",
            get(list_code_reviews).post(create_code_review),
        )
        .route("/api/v1/code-reviews/:id", get(get_code_review))
        .route("/api/v1/code-reviews/:id/cancel", post(cancel_code_review))
}
