//! Admin-only account management. Users are never hard-deleted.

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use super::auth::{refresh_key, AuthUser};
use super::error::ApiError;
use crate::db::{now_rfc3339, User, UserResponse};
use crate::AppState;

async fn set_active(
    state: &AppState,
    admin: &AuthUser,
    user_id: &str,
    active: bool,
) -> Result<User, ApiError> {
    admin.require_admin()?;
    if !active && admin.id() == user_id {
        return Err(ApiError::validation_field("id", "Admins cannot deactivate themselves"));
    }

    let result = sqlx::query("UPDATE users SET is_active = ?, updated_at = ? WHERE id = ?")
        .bind(active)
        .bind(now_rfc3339())
        .bind(user_id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("User not found"));
    }

    if !active {
        // Drop the refresh token so the session cannot be renewed
        state.kv.del(&refresh_key(user_id));
    }

    tracing::info!(user_id = %user_id, admin_id = %admin.id(), active, "User activation changed");

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(&state.db)
        .await?;
    Ok(user)
}

pub async fn deactivate_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = set_active(&state, &auth, &user_id, false).await?;
    Ok(Json(UserResponse::from(user)))
}

pub async fn activate_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = set_active(&state, &auth, &user_id, true).await?;
    Ok(Json(UserResponse::from(user)))
}
