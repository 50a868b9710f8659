use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Review {
    pub id: String,
    pub booking_id: String,
    pub traveller_id: String,
    pub buddy_id: String,
    pub rating: i64,
    pub comment: Option<String>,
    pub created_at: String,
}

/// Review joined with the reviewer's display name
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResponse {
    pub id: String,
    pub booking_id: String,
    pub traveller_id: String,
    pub traveller_name: String,
    pub buddy_id: String,
    pub rating: i64,
    pub comment: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReviewRequest {
    pub booking_id: String,
    pub rating: i64,
    pub comment: Option<String>,
}
