//! Booking lifecycle manager
//!
//! Owns every write to the `bookings` table:
//! - creation (validation, pricing, overlap check)
//! - status transitions (state machine plus role rules)
//! - payment status updates
//!
//! Each write runs in one transaction together with the buddy counter
//! recomputation, so the counters never disagree with the bookings table.
//! Transactions start with `BEGIN IMMEDIATE`, which makes the overlap check
//! and the insert of concurrent creates run one after another.

use chrono::{Duration, NaiveDate, NaiveTime};
use sqlx::SqliteConnection;

use super::stats::recompute_buddy_stats;
use super::{Actor, ServiceError, ServiceResult};
use crate::api::metrics::record_booking_status;
use crate::config::BookingConfig;
use crate::db::{
    begin_write, format_local_datetime, now_rfc3339, serialize_json_list, Booking, BookingStatus,
    CancelledBy, CreateBookingRequest, DbPool, PaymentStatus, UserRole,
};

pub const MIN_DURATION_HOURS: i64 = 1;
pub const MAX_DURATION_HOURS: i64 = 24;
pub const MIN_PEOPLE: i64 = 1;
pub const MAX_PEOPLE: i64 = 20;

/// `hourly_rate × duration + surcharge × (people − 1)`
pub fn compute_price(hourly_rate: f64, duration: i64, people: i64, surcharge: f64) -> f64 {
    let extra_people = (people - 1).max(0);
    hourly_rate * duration as f64 + surcharge * extra_people as f64
}

/// Whether the caller may move a booking to `target`, assuming the caller
/// is already known to be a party or an admin
pub fn role_may_transition(actor: &Actor, booking: &Booking, target: BookingStatus) -> bool {
    if actor.is_admin() {
        return true;
    }
    match target {
        BookingStatus::Confirmed | BookingStatus::Rejected | BookingStatus::Completed => {
            actor.id == booking.buddy_id
        }
        BookingStatus::Cancelled => booking.is_party(&actor.id),
        BookingStatus::Pending => false,
    }
}

fn cancelling_party(actor: &Actor, booking: &Booking) -> CancelledBy {
    if actor.id == booking.buddy_id {
        CancelledBy::Buddy
    } else if actor.id == booking.traveller_id {
        CancelledBy::Traveller
    } else {
        CancelledBy::Admin
    }
}

/// Validated booking window, in local wall-clock time
#[derive(Debug, Clone)]
struct BookingWindow {
    buddy_id: String,
    destination_id: String,
    start_at: String,
    end_at: String,
    duration: i64,
    people: i64,
}

fn validate_request(req: &CreateBookingRequest) -> ServiceResult<BookingWindow> {
    let buddy_id = req
        .buddy_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ServiceError::validation("buddyId", "Buddy is required"))?;
    let destination_id = req
        .destination_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ServiceError::validation("destinationId", "Destination is required"))?;

    let date = req
        .start_date
        .as_deref()
        .ok_or_else(|| ServiceError::validation("startDate", "Start date is required"))?;
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| ServiceError::validation("startDate", "Start date must be YYYY-MM-DD"))?;

    let time = req
        .start_time
        .as_deref()
        .ok_or_else(|| ServiceError::validation("startTime", "Start time is required"))?;
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M")
        .map_err(|_| ServiceError::validation("startTime", "Start time must be HH:MM"))?;

    let duration = req
        .duration
        .ok_or_else(|| ServiceError::validation("duration", "Duration is required"))?;
    if !(MIN_DURATION_HOURS..=MAX_DURATION_HOURS).contains(&duration) {
        return Err(ServiceError::validation(
            "duration",
            format!(
                "Duration must be between {} and {} hours",
                MIN_DURATION_HOURS, MAX_DURATION_HOURS
            ),
        ));
    }

    let people = req
        .number_of_people
        .ok_or_else(|| ServiceError::validation("numberOfPeople", "Number of people is required"))?;
    if !(MIN_PEOPLE..=MAX_PEOPLE).contains(&people) {
        return Err(ServiceError::validation(
            "numberOfPeople",
            format!("Number of people must be between {} and {}", MIN_PEOPLE, MAX_PEOPLE),
        ));
    }

    if let Some(price) = req.total_price {
        if !price.is_finite() || price < 0.0 {
            return Err(ServiceError::validation(
                "totalPrice",
                "Total price must be a non-negative number",
            ));
        }
    }

    let start = date.and_time(time);
    let end = start + Duration::hours(duration);

    Ok(BookingWindow {
        buddy_id: buddy_id.to_string(),
        destination_id: destination_id.to_string(),
        start_at: format_local_datetime(&start),
        end_at: format_local_datetime(&end),
        duration,
        people,
    })
}

async fn fetch_booking(conn: &mut SqliteConnection, id: &str) -> ServiceResult<Booking> {
    sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Booking"))
}

/// Number of pending or confirmed bookings of `buddy_id` overlapping
/// the half-open window `[start_at, end_at)`
pub async fn count_overlapping(
    conn: &mut SqliteConnection,
    buddy_id: &str,
    start_at: &str,
    end_at: &str,
) -> Result<i64, sqlx::Error> {
    let sql = format!(
        "SELECT COUNT(*) FROM bookings \
         WHERE buddy_id = ? AND status IN ({}) AND start_at < ? AND end_at > ?",
        BookingStatus::slot_blocking_sql()
    );
    sqlx::query_scalar(&sql)
        .bind(buddy_id)
        .bind(end_at)
        .bind(start_at)
        .fetch_one(&mut *conn)
        .await
}

#[derive(Clone)]
pub struct BookingManager {
    db: DbPool,
    config: BookingConfig,
}

impl BookingManager {
    pub fn new(db: DbPool, config: BookingConfig) -> Self {
        Self { db, config }
    }

    /// Create a pending booking for the calling traveller
    pub async fn create(&self, actor: &Actor, req: CreateBookingRequest) -> ServiceResult<Booking> {
        if actor.role != UserRole::Traveller {
            return Err(ServiceError::forbidden("Only travellers can create bookings"));
        }
        let window = validate_request(&req)?;

        let mut tx = begin_write(&self.db).await?;

        let requester: Option<bool> = sqlx::query_scalar(
            "SELECT is_active FROM users WHERE id = ? AND role = 'traveller'",
        )
        .bind(&actor.id)
        .fetch_optional(&mut *tx)
        .await?;
        if requester != Some(true) {
            return Err(ServiceError::forbidden("Only active travellers can create bookings"));
        }

        let buddy: Option<(bool, f64)> = sqlx::query_as(
            r#"
            SELECT u.is_active, p.hourly_rate
            FROM users u JOIN buddy_profiles p ON p.user_id = u.id
            WHERE u.id = ? AND u.role = 'tour-guide'
            "#,
        )
        .bind(&window.buddy_id)
        .fetch_optional(&mut *tx)
        .await?;
        let hourly_rate = match buddy {
            Some((true, rate)) => rate,
            _ => return Err(ServiceError::not_found("Buddy")),
        };

        let destination: Option<i64> = sqlx::query_scalar("SELECT 1 FROM destinations WHERE id = ?")
            .bind(&window.destination_id)
            .fetch_optional(&mut *tx)
            .await?;
        if destination.is_none() {
            return Err(ServiceError::not_found("Destination"));
        }

        for activity in &req.activities {
            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM activities WHERE id = ?")
                .bind(activity)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_none() {
                return Err(ServiceError::not_found(format!("Activity '{}'", activity)));
            }
        }

        let overlapping =
            count_overlapping(&mut tx, &window.buddy_id, &window.start_at, &window.end_at).await?;
        if overlapping > 0 {
            tracing::info!(
                buddy_id = %window.buddy_id,
                start = %window.start_at,
                end = %window.end_at,
                "Booking rejected: slot already taken"
            );
            return Err(ServiceError::SlotConflict);
        }

        let total_price = req.total_price.unwrap_or_else(|| {
            compute_price(
                hourly_rate,
                window.duration,
                window.people,
                self.config.per_person_surcharge,
            )
        });

        let id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO bookings (
                id, traveller_id, buddy_id, destination_id, activities, start_at, end_at,
                duration, number_of_people, total_price, payment_status, status,
                special_requests, meeting_point, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', 'pending', ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&actor.id)
        .bind(&window.buddy_id)
        .bind(&window.destination_id)
        .bind(serialize_json_list(&req.activities))
        .bind(&window.start_at)
        .bind(&window.end_at)
        .bind(window.duration)
        .bind(window.people)
        .bind(total_price)
        .bind(&req.special_requests)
        .bind(&req.meeting_point)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        recompute_buddy_stats(&mut tx, &window.buddy_id).await?;
        let booking = fetch_booking(&mut tx, &id).await?;
        tx.commit().await?;

        record_booking_status(BookingStatus::Pending.as_str());
        tracing::info!(
            booking_id = %booking.id,
            traveller_id = %booking.traveller_id,
            buddy_id = %booking.buddy_id,
            total_price = booking.total_price,
            "Booking created"
        );

        Ok(booking)
    }

    /// Move a booking to `target`.
    ///
    /// Checks run in a fixed order: the booking exists, the caller is a
    /// party or an admin, the transition is legal, the caller's role may
    /// perform it.
    pub async fn transition(
        &self,
        actor: &Actor,
        booking_id: &str,
        target: BookingStatus,
        reason: Option<String>,
    ) -> ServiceResult<Booking> {
        let mut tx = begin_write(&self.db).await?;

        let booking = fetch_booking(&mut tx, booking_id).await?;

        if !actor.is_admin() && !booking.is_party(&actor.id) {
            return Err(ServiceError::forbidden(
                "You are not a party to this booking",
            ));
        }

        let current = booking.status_enum();
        if !current.can_transition_to(target) {
            return Err(ServiceError::InvalidTransition {
                from: current,
                to: target,
            });
        }

        if !role_may_transition(actor, &booking, target) {
            return Err(ServiceError::forbidden(format!(
                "You are not allowed to mark this booking as {}",
                target
            )));
        }

        let now = now_rfc3339();
        let mut confirmation_date = None;
        let mut completion_date = None;
        let mut cancellation_date = None;
        let mut cancelled_by = None;
        let mut cancellation_reason = None;
        match target {
            BookingStatus::Confirmed => confirmation_date = Some(now.clone()),
            BookingStatus::Completed => completion_date = Some(now.clone()),
            BookingStatus::Cancelled | BookingStatus::Rejected => {
                cancellation_date = Some(now.clone());
                cancelled_by = Some(cancelling_party(actor, &booking).as_str());
                cancellation_reason = reason.filter(|r| !r.trim().is_empty());
            }
            BookingStatus::Pending => {}
        }

        sqlx::query(
            r#"
            UPDATE bookings SET
                status = ?,
                updated_at = ?,
                confirmation_date = COALESCE(?, confirmation_date),
                completion_date = COALESCE(?, completion_date),
                cancellation_date = COALESCE(?, cancellation_date),
                cancelled_by = COALESCE(?, cancelled_by),
                cancellation_reason = COALESCE(?, cancellation_reason)
            WHERE id = ?
            "#,
        )
        .bind(target.as_str())
        .bind(&now)
        .bind(confirmation_date)
        .bind(completion_date)
        .bind(cancellation_date)
        .bind(cancelled_by)
        .bind(cancellation_reason)
        .bind(booking_id)
        .execute(&mut *tx)
        .await?;

        recompute_buddy_stats(&mut tx, &booking.buddy_id).await?;
        let updated = fetch_booking(&mut tx, booking_id).await?;
        tx.commit().await?;

        record_booking_status(target.as_str());
        tracing::info!(
            booking_id = %booking_id,
            actor_id = %actor.id,
            from = %current,
            to = %target,
            "Booking status changed"
        );

        Ok(updated)
    }

    /// Set the payment status; only the traveller or an admin may do this
    pub async fn update_payment(
        &self,
        actor: &Actor,
        booking_id: &str,
        status: PaymentStatus,
    ) -> ServiceResult<Booking> {
        let mut conn = self.db.acquire().await?;
        let booking = fetch_booking(&mut conn, booking_id).await?;

        if !actor.is_admin() && actor.id != booking.traveller_id {
            return Err(ServiceError::forbidden(
                "Only the traveller can update the payment status",
            ));
        }

        sqlx::query("UPDATE bookings SET payment_status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now_rfc3339())
            .bind(booking_id)
            .execute(&mut *conn)
            .await?;

        tracing::info!(booking_id = %booking_id, payment_status = status.as_str(), "Payment status updated");
        fetch_booking(&mut conn, booking_id).await
    }

    /// A single booking, visible to its parties and admins
    pub async fn get(&self, actor: &Actor, booking_id: &str) -> ServiceResult<Booking> {
        let mut conn = self.db.acquire().await?;
        let booking = fetch_booking(&mut conn, booking_id).await?;
        if !actor.is_admin() && !booking.is_party(&actor.id) {
            return Err(ServiceError::forbidden("You are not a party to this booking"));
        }
        Ok(booking)
    }

    /// Every booking where `user_id` is the traveller or the buddy, newest first
    pub async fn list_for_user(&self, actor: &Actor, user_id: &str) -> ServiceResult<Vec<Booking>> {
        if !actor.is_admin() && actor.id != user_id {
            return Err(ServiceError::forbidden("You can only list your own bookings"));
        }
        let bookings = sqlx::query_as::<_, Booking>(
            r#"
            SELECT * FROM bookings
            WHERE traveller_id = ? OR buddy_id = ?
            ORDER BY start_at DESC
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(bookings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{insert_user, test_pool};

    struct Fixture {
        manager: BookingManager,
        pool: DbPool,
        traveller: Actor,
        buddy: Actor,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let (pool, dir) = test_pool().await;
        let traveller = insert_user(&pool, "Tom", UserRole::Traveller).await;
        let buddy = insert_user(&pool, "Linh", UserRole::TourGuide).await;
        Fixture {
            manager: BookingManager::new(pool.clone(), BookingConfig::default()),
            pool,
            traveller: Actor::new(traveller, UserRole::Traveller),
            buddy: Actor::new(buddy, UserRole::TourGuide),
            _dir: dir,
        }
    }

    fn request(buddy_id: &str, start_time: &str, duration: i64, people: i64) -> CreateBookingRequest {
        CreateBookingRequest {
            buddy_id: Some(buddy_id.to_string()),
            destination_id: Some("hanoi".to_string()),
            activities: vec!["street-food-tour".to_string()],
            start_date: Some("2024-06-01".to_string()),
            start_time: Some(start_time.to_string()),
            duration: Some(duration),
            number_of_people: Some(people),
            ..Default::default()
        }
    }

    async fn buddy_counters(pool: &DbPool, buddy_id: &str) -> (i64, i64, f64) {
        sqlx::query_as(
            "SELECT total_bookings, completed_bookings, cancellation_rate FROM buddy_profiles WHERE user_id = ?",
        )
        .bind(buddy_id)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[test]
    fn test_compute_price() {
        assert_eq!(compute_price(20.0, 2, 1, 5.0), 40.0);
        assert_eq!(compute_price(20.0, 2, 3, 5.0), 50.0);
        assert_eq!(compute_price(15.5, 1, 0, 5.0), 15.5);
    }

    #[test]
    fn test_validation_rejects_out_of_range_fields() {
        let mut req = request("b", "09:00", 0, 1);
        assert!(matches!(
            validate_request(&req),
            Err(ServiceError::Validation { field: "duration", .. })
        ));

        req.duration = Some(2);
        req.number_of_people = Some(21);
        assert!(matches!(
            validate_request(&req),
            Err(ServiceError::Validation { field: "numberOfPeople", .. })
        ));

        req.number_of_people = Some(2);
        req.start_time = Some("9am".to_string());
        assert!(matches!(
            validate_request(&req),
            Err(ServiceError::Validation { field: "startTime", .. })
        ));

        req.start_time = Some("23:00".to_string());
        let window = validate_request(&req).unwrap();
        assert_eq!(window.start_at, "2024-06-01T23:00:00");
        assert_eq!(window.end_at, "2024-06-02T01:00:00");
    }

    #[tokio::test]
    async fn test_create_computes_price_and_is_pending() {
        let f = fixture().await;

        let single = f
            .manager
            .create(&f.traveller, request(&f.buddy.id, "09:00", 2, 1))
            .await
            .unwrap();
        assert_eq!(single.total_price, 40.0);
        assert_eq!(single.status_enum(), BookingStatus::Pending);
        assert_eq!(single.payment_status_enum(), PaymentStatus::Pending);
        assert!(single.confirmation_date.is_none());
        assert!(single.cancellation_date.is_none());

        let group = f
            .manager
            .create(&f.traveller, request(&f.buddy.id, "13:00", 2, 3))
            .await
            .unwrap();
        assert_eq!(group.total_price, 50.0);

        assert_eq!(buddy_counters(&f.pool, &f.buddy.id).await, (2, 0, 0.0));
    }

    #[tokio::test]
    async fn test_client_supplied_price_is_kept() {
        let f = fixture().await;
        let mut req = request(&f.buddy.id, "09:00", 2, 1);
        req.total_price = Some(99.0);
        let booking = f.manager.create(&f.traveller, req).await.unwrap();
        assert_eq!(booking.total_price, 99.0);
    }

    #[tokio::test]
    async fn test_overlapping_booking_conflicts_and_persists_nothing() {
        let f = fixture().await;
        f.manager
            .create(&f.traveller, request(&f.buddy.id, "09:00", 2, 1))
            .await
            .unwrap();

        let result = f
            .manager
            .create(&f.traveller, request(&f.buddy.id, "10:00", 2, 1))
            .await;
        assert!(matches!(result, Err(ServiceError::SlotConflict)));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookings")
            .fetch_one(&f.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(buddy_counters(&f.pool, &f.buddy.id).await.0, 1);

        // Back-to-back windows do not overlap
        f.manager
            .create(&f.traveller, request(&f.buddy.id, "11:00", 1, 1))
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_overlapping_creates_admit_exactly_one() {
        let f = fixture().await;
        let mut travellers = Vec::new();
        for i in 0..8 {
            let id = insert_user(&f.pool, &format!("Guest{}", i), UserRole::Traveller).await;
            travellers.push(Actor::new(id, UserRole::Traveller));
        }

        for day in 1..=5 {
            let date = format!("2024-07-0{}", day);
            let handles: Vec<_> = travellers
                .iter()
                .enumerate()
                .map(|(i, traveller)| {
                    let manager = f.manager.clone();
                    let traveller = traveller.clone();
                    // Every window overlaps 10:00-11:00
                    let start = if i % 2 == 0 { "09:00" } else { "10:00" };
                    let req = CreateBookingRequest {
                        start_date: Some(date.clone()),
                        ..request(&f.buddy.id, start, 2, 1)
                    };
                    tokio::spawn(async move { manager.create(&traveller, req).await })
                })
                .collect();

            let mut created = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(_) => created += 1,
                    Err(ServiceError::SlotConflict) => {}
                    Err(e) => panic!("unexpected error on {}: {:?}", date, e),
                }
            }
            assert_eq!(created, 1, "exactly one booking per window on {}", date);
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookings")
            .fetch_one(&f.pool)
            .await
            .unwrap();
        assert_eq!(count, 5);
        assert_eq!(buddy_counters(&f.pool, &f.buddy.id).await.0, 5);
    }

    #[tokio::test]
    async fn test_rejected_booking_frees_the_slot() {
        let f = fixture().await;
        let first = f
            .manager
            .create(&f.traveller, request(&f.buddy.id, "09:00", 2, 1))
            .await
            .unwrap();
        f.manager
            .transition(&f.buddy, &first.id, BookingStatus::Rejected, None)
            .await
            .unwrap();

        f.manager
            .create(&f.traveller, request(&f.buddy.id, "09:00", 2, 1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_only_travellers_create_bookings() {
        let f = fixture().await;
        let result = f
            .manager
            .create(&f.buddy, request(&f.buddy.id, "09:00", 2, 1))
            .await;
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_unknown_references_are_not_found() {
        let f = fixture().await;

        let result = f
            .manager
            .create(&f.traveller, request("no-such-buddy", "09:00", 2, 1))
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));

        let mut req = request(&f.buddy.id, "09:00", 2, 1);
        req.destination_id = Some("atlantis".to_string());
        let result = f.manager.create(&f.traveller, req).await;
        assert!(matches!(result, Err(ServiceError::NotFound(ref what)) if what == "Destination"));

        let mut req = request(&f.buddy.id, "09:00", 2, 1);
        req.activities = vec!["skydiving".to_string()];
        let result = f.manager.create(&f.traveller, req).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_buddy_rejects_with_reason() {
        let f = fixture().await;
        let booking = f
            .manager
            .create(&f.traveller, request(&f.buddy.id, "09:00", 2, 1))
            .await
            .unwrap();

        let rejected = f
            .manager
            .transition(
                &f.buddy,
                &booking.id,
                BookingStatus::Rejected,
                Some("fully booked".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(rejected.status_enum(), BookingStatus::Rejected);
        assert_eq!(rejected.cancelled_by.as_deref(), Some("buddy"));
        assert!(rejected.cancellation_date.is_some());
        assert_eq!(rejected.cancellation_reason.as_deref(), Some("fully booked"));
        assert!(rejected.confirmation_date.is_none());

        // Rejected bookings drop out of the total
        assert_eq!(buddy_counters(&f.pool, &f.buddy.id).await, (0, 0, 0.0));
    }

    #[tokio::test]
    async fn test_traveller_cannot_confirm_or_complete() {
        let f = fixture().await;
        let booking = f
            .manager
            .create(&f.traveller, request(&f.buddy.id, "09:00", 2, 1))
            .await
            .unwrap();

        let result = f
            .manager
            .transition(&f.traveller, &booking.id, BookingStatus::Confirmed, None)
            .await;
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));

        f.manager
            .transition(&f.buddy, &booking.id, BookingStatus::Confirmed, None)
            .await
            .unwrap();
        let result = f
            .manager
            .transition(&f.traveller, &booking.id, BookingStatus::Completed, None)
            .await;
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_invalid_transition_leaves_status_unchanged() {
        let f = fixture().await;
        let booking = f
            .manager
            .create(&f.traveller, request(&f.buddy.id, "09:00", 2, 1))
            .await
            .unwrap();

        let result = f
            .manager
            .transition(&f.buddy, &booking.id, BookingStatus::Completed, None)
            .await;
        assert!(matches!(
            result,
            Err(ServiceError::InvalidTransition {
                from: BookingStatus::Pending,
                to: BookingStatus::Completed
            })
        ));

        let stored = f.manager.get(&f.buddy, &booking.id).await.unwrap();
        assert_eq!(stored.status_enum(), BookingStatus::Pending);
        assert!(stored.completion_date.is_none());
    }

    #[tokio::test]
    async fn test_full_lifecycle_updates_counters_and_dates() {
        let f = fixture().await;
        let first = f
            .manager
            .create(&f.traveller, request(&f.buddy.id, "09:00", 2, 1))
            .await
            .unwrap();
        let second = f
            .manager
            .create(&f.traveller, request(&f.buddy.id, "14:00", 1, 1))
            .await
            .unwrap();

        f.manager
            .transition(&f.buddy, &first.id, BookingStatus::Confirmed, None)
            .await
            .unwrap();
        let completed = f
            .manager
            .transition(&f.buddy, &first.id, BookingStatus::Completed, None)
            .await
            .unwrap();
        assert!(completed.confirmation_date.is_some());
        assert!(completed.completion_date.is_some());
        assert!(completed.cancellation_date.is_none());

        let cancelled = f
            .manager
            .transition(&f.traveller, &second.id, BookingStatus::Cancelled, Some("rain".into()))
            .await
            .unwrap();
        assert_eq!(cancelled.cancelled_by.as_deref(), Some("traveller"));
        assert!(cancelled.completion_date.is_none());

        assert_eq!(buddy_counters(&f.pool, &f.buddy.id).await, (2, 1, 50.0));

        // Terminal states accept nothing further
        let result = f
            .manager
            .transition(&f.buddy, &first.id, BookingStatus::Cancelled, None)
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_outsider_is_forbidden_before_transition_check() {
        let f = fixture().await;
        let outsider_id = insert_user(&f.pool, "Eve", UserRole::Traveller).await;
        let outsider = Actor::new(outsider_id, UserRole::Traveller);
        let booking = f
            .manager
            .create(&f.traveller, request(&f.buddy.id, "09:00", 2, 1))
            .await
            .unwrap();

        let result = f
            .manager
            .transition(&outsider, &booking.id, BookingStatus::Completed, None)
            .await;
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));

        let missing = f
            .manager
            .transition(&f.buddy, "missing", BookingStatus::Confirmed, None)
            .await;
        assert!(matches!(missing, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_admin_cancellation_is_recorded_as_admin() {
        let f = fixture().await;
        let admin_id = insert_user(&f.pool, "Root", UserRole::Admin).await;
        let admin = Actor::new(admin_id, UserRole::Admin);
        let booking = f
            .manager
            .create(&f.traveller, request(&f.buddy.id, "09:00", 2, 1))
            .await
            .unwrap();

        let cancelled = f
            .manager
            .transition(&admin, &booking.id, BookingStatus::Cancelled, None)
            .await
            .unwrap();
        assert_eq!(cancelled.cancelled_by.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_payment_update_permissions() {
        let f = fixture().await;
        let booking = f
            .manager
            .create(&f.traveller, request(&f.buddy.id, "09:00", 2, 1))
            .await
            .unwrap();

        let result = f
            .manager
            .update_payment(&f.buddy, &booking.id, PaymentStatus::Paid)
            .await;
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));

        let paid = f
            .manager
            .update_payment(&f.traveller, &booking.id, PaymentStatus::Paid)
            .await
            .unwrap();
        assert_eq!(paid.payment_status_enum(), PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_list_for_user_is_self_or_admin() {
        let f = fixture().await;
        f.manager
            .create(&f.traveller, request(&f.buddy.id, "09:00", 2, 1))
            .await
            .unwrap();

        assert_eq!(
            f.manager
                .list_for_user(&f.buddy, &f.buddy.id)
                .await
                .unwrap()
                .len(),
            1
        );
        let result = f.manager.list_for_user(&f.buddy, &f.traveller.id).await;
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));
    }
}
