use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{parse_date, validate_hourly_rate};
use crate::db::{
    now_rfc3339, serialize_json_list, AvailabilityQuery, BuddyListQuery, BuddyResponse, BuddyRow,
    ReviewResponse, UpdateBuddyProfileRequest, UserRole, BUDDY_COLUMNS,
};
use crate::engine::{self, SlotAvailability};
use crate::AppState;

async fn fetch_buddy(state: &AppState, buddy_id: &str) -> Result<Option<BuddyRow>, ApiError> {
    let row = sqlx::query_as::<_, BuddyRow>(&format!(
        "SELECT {} FROM users u JOIN buddy_profiles p ON p.user_id = u.id \
         WHERE u.id = ? AND u.role = 'tour-guide'",
        BUDDY_COLUMNS
    ))
    .bind(buddy_id)
    .fetch_optional(&state.db)
    .await?;
    Ok(row)
}

fn to_response(state: &AppState, row: BuddyRow) -> BuddyResponse {
    let connected = state.registry.is_online(&row.id);
    BuddyResponse::from_row(row, connected)
}

/// List active buddies, optionally for one destination, best rated first
pub async fn list_buddies(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BuddyListQuery>,
) -> Result<Json<Vec<BuddyResponse>>, ApiError> {
    let mut sql = format!(
        "SELECT {} FROM users u JOIN buddy_profiles p ON p.user_id = u.id \
         WHERE u.role = 'tour-guide' AND u.is_active = 1",
        BUDDY_COLUMNS
    );
    if query.destination_id.is_some() {
        sql.push_str(" AND p.destination_id = ?");
    }
    sql.push_str(" ORDER BY p.rating_average DESC, p.rating_count DESC, u.name ASC");

    let mut q = sqlx::query_as::<_, BuddyRow>(&sql);
    if let Some(destination_id) = &query.destination_id {
        q = q.bind(destination_id);
    }
    let rows = q.fetch_all(&state.db).await?;

    let buddies = rows.into_iter().map(|row| to_response(&state, row)).collect();
    Ok(Json(buddies))
}

/// Get a single active buddy
pub async fn get_buddy(
    State(state): State<Arc<AppState>>,
    Path(buddy_id): Path<String>,
) -> Result<Json<BuddyResponse>, ApiError> {
    let row = fetch_buddy(&state, &buddy_id)
        .await?
        .filter(|row| row.is_active)
        .ok_or_else(|| ApiError::not_found("Buddy not found"))?;
    Ok(Json(to_response(&state, row)))
}

/// Update the caller's own buddy profile. Omitted fields are left unchanged.
pub async fn update_my_profile(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<UpdateBuddyProfileRequest>,
) -> Result<Json<BuddyResponse>, ApiError> {
    if auth.0.role_enum() != UserRole::TourGuide {
        return Err(ApiError::forbidden("Only tour guides have a buddy profile"));
    }

    let mut errors = ValidationErrorBuilder::new();
    if let Some(rate) = req.hourly_rate {
        errors.check("hourlyRate", validate_hourly_rate(rate));
    }
    if let Some(destination_id) = &req.destination_id {
        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM destinations WHERE id = ?")
            .bind(destination_id)
            .fetch_optional(&state.db)
            .await?;
        if exists.is_none() {
            errors.add("destinationId", format!("Unknown destination: {}", destination_id));
        }
    }
    if let Some(activities) = &req.related_activities {
        for activity_id in activities {
            let exists: Option<String> = sqlx::query_scalar("SELECT id FROM activities WHERE id = ?")
                .bind(activity_id)
                .fetch_optional(&state.db)
                .await?;
            if exists.is_none() {
                errors.add("relatedActivities", format!("Unknown activity: {}", activity_id));
            }
        }
    }
    errors.finish()?;

    sqlx::query(
        r#"
        UPDATE buddy_profiles SET
            bio = COALESCE(?, bio),
            languages = COALESCE(?, languages),
            hourly_rate = COALESCE(?, hourly_rate),
            availability = COALESCE(?, availability),
            destination_id = COALESCE(?, destination_id),
            related_activities = COALESCE(?, related_activities),
            updated_at = ?
        WHERE user_id = ?
        "#,
    )
    .bind(&req.bio)
    .bind(req.languages.as_deref().map(serialize_json_list))
    .bind(req.hourly_rate)
    .bind(req.availability.as_ref().map(|a| a.to_json()))
    .bind(&req.destination_id)
    .bind(req.related_activities.as_deref().map(serialize_json_list))
    .bind(now_rfc3339())
    .bind(auth.id())
    .execute(&state.db)
    .await?;

    tracing::info!(buddy_id = %auth.id(), "Buddy profile updated");

    let row = fetch_buddy(&state, auth.id())
        .await?
        .ok_or_else(|| ApiError::not_found("Buddy profile not found"))?;
    Ok(Json(to_response(&state, row)))
}

/// Bookable hourly start times for one calendar day
pub async fn get_availability(
    State(state): State<Arc<AppState>>,
    Path(buddy_id): Path<String>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Vec<SlotAvailability>>, ApiError> {
    let date = parse_date(&query.date).map_err(|e| ApiError::validation_field("date", e))?;
    let slots =
        engine::buddy_availability(&state.db, &buddy_id, date, state.config.booking.default_slot)
            .await?;
    Ok(Json(slots))
}

/// Reviews left for a buddy, newest first
pub async fn list_buddy_reviews(
    State(state): State<Arc<AppState>>,
    Path(buddy_id): Path<String>,
) -> Result<Json<Vec<ReviewResponse>>, ApiError> {
    let reviews = engine::list_reviews(&state.db, &buddy_id).await?;
    Ok(Json(reviews))
}
