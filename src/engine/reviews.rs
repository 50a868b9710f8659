//! Reviews of completed bookings.

use super::stats::recompute_rating;
use super::{Actor, ServiceError, ServiceResult};
use crate::db::{
    begin_write, now_rfc3339, Booking, BookingStatus, CreateReviewRequest, DbPool, Review, ReviewResponse,
};

pub async fn create_review(db: &DbPool, actor: &Actor, req: CreateReviewRequest) -> ServiceResult<Review> {
    if !(1..=5).contains(&req.rating) {
        return Err(ServiceError::validation("rating", "Rating must be between 1 and 5"));
    }

    let mut tx = begin_write(db).await?;

    let booking = sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = ?")
        .bind(&req.booking_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ServiceError::not_found("Booking"))?;

    if booking.traveller_id != actor.id {
        return Err(ServiceError::forbidden("Only the traveller can review this booking"));
    }
    if booking.status_enum() != BookingStatus::Completed {
        return Err(ServiceError::validation(
            "bookingId",
            "Only completed bookings can be reviewed",
        ));
    }

    let existing: Option<String> = sqlx::query_scalar("SELECT id FROM reviews WHERE booking_id = ?")
        .bind(&booking.id)
        .fetch_optional(&mut *tx)
        .await?;
    if existing.is_some() {
        return Err(ServiceError::Conflict("This booking has already been reviewed".to_string()));
    }

    let review = Review {
        id: uuid::Uuid::new_v4().to_string(),
        booking_id: booking.id.clone(),
        traveller_id: booking.traveller_id.clone(),
        buddy_id: booking.buddy_id.clone(),
        rating: req.rating,
        comment: req.comment.filter(|c| !c.trim().is_empty()),
        created_at: now_rfc3339(),
    };

    sqlx::query(
        r#"
        INSERT INTO reviews (id, booking_id, traveller_id, buddy_id, rating, comment, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&review.id)
    .bind(&review.booking_id)
    .bind(&review.traveller_id)
    .bind(&review.buddy_id)
    .bind(review.rating)
    .bind(&review.comment)
    .bind(&review.created_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.message().contains("UNIQUE constraint failed") => {
            ServiceError::Conflict("This booking has already been reviewed".to_string())
        }
        other => ServiceError::Database(other),
    })?;

    let (average, _) = recompute_rating(&mut tx, &review.buddy_id).await?;
    tx.commit().await?;

    tracing::info!(
        review_id = %review.id,
        buddy_id = %review.buddy_id,
        rating = review.rating,
        average,
        "Review submitted"
    );

    Ok(review)
}

/// Reviews of a buddy, newest first
pub async fn list_reviews(db: &DbPool, buddy_id: &str) -> ServiceResult<Vec<ReviewResponse>> {
    let reviews = sqlx::query_as::<_, ReviewResponse>(
        r#"
        SELECT r.id, r.booking_id, r.traveller_id, u.name AS traveller_name, r.buddy_id,
               r.rating, r.comment, r.created_at
        FROM reviews r JOIN users u ON u.id = r.traveller_id
        WHERE r.buddy_id = ?
        ORDER BY r.created_at DESC
        "#,
    )
    .bind(buddy_id)
    .fetch_all(db)
    .await?;
    Ok(reviews)
}
