//! Buddy aggregate counters.
//!
//! Counters are always re-derived from the bookings and reviews tables so
//! running them twice, or from two concurrent writers, converges on the
//! same values.

use sqlx::SqliteConnection;

use crate::db::now_rfc3339;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookingStats {
    pub total_bookings: i64,
    pub completed_bookings: i64,
    pub cancellation_rate: f64,
}

/// Percentage of cancelled bookings, rounded to 2 decimals
pub fn cancellation_rate(cancelled: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let rate = cancelled as f64 / total as f64 * 100.0;
    ((rate * 100.0).round() / 100.0).clamp(0.0, 100.0)
}

/// Weighted mean of a 1..=5 star breakdown (0 when empty)
pub fn rating_average(counts: &[i64; 5]) -> f64 {
    let total: i64 = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let weighted: i64 = counts
        .iter()
        .enumerate()
        .map(|(i, c)| (i as i64 + 1) * c)
        .sum();
    weighted as f64 / total as f64
}

/// Recompute `total_bookings`, `completed_bookings` and `cancellation_rate`
/// for a buddy. Rejected bookings are not counted.
pub async fn recompute_buddy_stats(
    conn: &mut SqliteConnection,
    buddy_id: &str,
) -> Result<BookingStats, sqlx::Error> {
    let (total, completed, cancelled): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COALESCE(SUM(CASE WHEN status != 'rejected' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status = 'cancelled' THEN 1 ELSE 0 END), 0)
        FROM bookings
        WHERE buddy_id = ?
        "#,
    )
    .bind(buddy_id)
    .fetch_one(&mut *conn)
    .await?;

    let stats = BookingStats {
        total_bookings: total,
        completed_bookings: completed,
        cancellation_rate: cancellation_rate(cancelled, total),
    };

    sqlx::query(
        r#"
        UPDATE buddy_profiles
        SET total_bookings = ?, completed_bookings = ?, cancellation_rate = ?, updated_at = ?
        WHERE user_id = ?
        "#,
    )
    .bind(stats.total_bookings)
    .bind(stats.completed_bookings)
    .bind(stats.cancellation_rate)
    .bind(now_rfc3339())
    .bind(buddy_id)
    .execute(&mut *conn)
    .await?;

    tracing::debug!(
        buddy_id = %buddy_id,
        total = stats.total_bookings,
        completed = stats.completed_bookings,
        cancellation_rate = stats.cancellation_rate,
        "Buddy booking stats recomputed"
    );

    Ok(stats)
}

/// Recompute the star breakdown and average rating from the reviews table
pub async fn recompute_rating(
    conn: &mut SqliteConnection,
    buddy_id: &str,
) -> Result<(f64, [i64; 5]), sqlx::Error> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT rating, COUNT(*) FROM reviews WHERE buddy_id = ? GROUP BY rating",
    )
    .bind(buddy_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut counts = [0i64; 5];
    for (rating, count) in rows {
        if (1..=5).contains(&rating) {
            counts[(rating - 1) as usize] = count;
        }
    }
    let average = rating_average(&counts);

    sqlx::query(
        r#"
        UPDATE buddy_profiles
        SET rating_average = ?, rating_count = ?,
            rating_1 = ?, rating_2 = ?, rating_3 = ?, rating_4 = ?, rating_5 = ?,
            updated_at = ?
        WHERE user_id = ?
        "#,
    )
    .bind(average)
    .bind(counts.iter().sum::<i64>())
    .bind(counts[0])
    .bind(counts[1])
    .bind(counts[2])
    .bind(counts[3])
    .bind(counts[4])
    .bind(now_rfc3339())
    .bind(buddy_id)
    .execute(&mut *conn)
    .await?;

    Ok((average, counts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{insert_user, test_pool};
    use crate::db::UserRole;

    #[test]
    fn test_cancellation_rate_rounding() {
        assert_eq!(cancellation_rate(0, 0), 0.0);
        assert_eq!(cancellation_rate(1, 3), 33.33);
        assert_eq!(cancellation_rate(2, 3), 66.67);
        assert_eq!(cancellation_rate(4, 4), 100.0);
    }

    #[test]
    fn test_rating_average_is_weighted_mean() {
        assert_eq!(rating_average(&[0, 0, 0, 0, 0]), 0.0);
        assert_eq!(rating_average(&[0, 0, 0, 1, 1]), 4.5);
        assert_eq!(rating_average(&[1, 0, 0, 0, 1]), 3.0);
    }

    #[tokio::test]
    async fn test_recompute_is_idempotent() {
        let (pool, _dir) = test_pool().await;
        let traveller = insert_user(&pool, "Tom", UserRole::Traveller).await;
        let buddy = insert_user(&pool, "Linh", UserRole::TourGuide).await;

        for (i, status) in ["pending", "completed", "cancelled", "rejected"].iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO bookings (id, traveller_id, buddy_id, destination_id, start_at, end_at,
                    duration, total_price, status)
                VALUES (?, ?, ?, 'hanoi', ?, ?, 1, 20, ?)
                "#,
            )
            .bind(format!("b{}", i))
            .bind(&traveller)
            .bind(&buddy)
            .bind(format!("2024-06-0{}T09:00:00", i + 1))
            .bind(format!("2024-06-0{}T10:00:00", i + 1))
            .bind(status)
            .execute(&pool)
            .await
            .unwrap();
        }

        let mut conn = pool.acquire().await.unwrap();
        let first = recompute_buddy_stats(&mut conn, &buddy).await.unwrap();
        let second = recompute_buddy_stats(&mut conn, &buddy).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.total_bookings, 3);
        assert_eq!(first.completed_bookings, 1);
        assert_eq!(first.cancellation_rate, 33.33);

        let stored: (i64, f64) = sqlx::query_as(
            "SELECT total_bookings, cancellation_rate FROM buddy_profiles WHERE user_id = ?",
        )
        .bind(&buddy)
        .fetch_one(&mut *conn)
        .await
        .unwrap();
        assert_eq!(stored, (3, 33.33));
    }
}
