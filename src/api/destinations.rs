use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use super::error::ApiError;
use crate::db::{Activity, Destination, DestinationDetail};
use crate::AppState;

pub async fn list_destinations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Destination>>, ApiError> {
    let destinations = sqlx::query_as::<_, Destination>("SELECT * FROM destinations ORDER BY name ASC")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(destinations))
}

/// A destination with the activities offered there
pub async fn get_destination(
    State(state): State<Arc<AppState>>,
    Path(destination_id): Path<String>,
) -> Result<Json<DestinationDetail>, ApiError> {
    let destination = sqlx::query_as::<_, Destination>("SELECT * FROM destinations WHERE id = ?")
        .bind(&destination_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Destination not found"))?;

    let activities = sqlx::query_as::<_, Activity>(
        r#"
        SELECT a.* FROM activities a
        JOIN destination_activities da ON da.activity_id = a.id
        WHERE da.destination_id = ?
        ORDER BY a.name ASC
        "#,
    )
    .bind(&destination_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(DestinationDetail {
        destination,
        activities,
    }))
}

pub async fn list_activities(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Activity>>, ApiError> {
    let activities = sqlx::query_as::<_, Activity>("SELECT * FROM activities ORDER BY category, name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(activities))
}
