use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::ApiError;
use crate::db::{CreateReviewRequest, Review};
use crate::engine;
use crate::AppState;

/// Review a completed booking. One review per booking.
pub async fn create_review(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<CreateReviewRequest>,
) -> Result<(StatusCode, Json<Review>), ApiError> {
    let review = engine::create_review(&state.db, &auth.actor(), req).await?;
    Ok((StatusCode::CREATED, Json(review)))
}
