//! Availability query: a buddy's bookable hourly start times for one date.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use std::collections::BTreeSet;

use super::{ServiceError, ServiceResult};
use crate::db::{
    format_clock, format_local_datetime, parse_local_datetime, BookingStatus, DbPool, TimeSlot,
    WeeklyAvailability,
};

const SLOT_MINUTES: u16 = 60;
const DAY_MINUTES: u16 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotAvailability {
    /// Start time, `HH:MM`
    pub time: String,
    pub is_available: bool,
}

/// Working slots for a weekday; an unset day falls back to `default_slot`
pub fn slots_for_day(
    availability: &WeeklyAvailability,
    weekday: chrono::Weekday,
    default_slot: TimeSlot,
) -> Vec<TimeSlot> {
    match availability.day(weekday) {
        Some(slots) => slots.to_vec(),
        None => vec![default_slot],
    }
}

/// Hourly start times (minutes since midnight) whose full hour fits inside
/// one of the slots. Slots ending at or before their start stop at midnight.
pub fn expand_start_times(slots: &[TimeSlot]) -> BTreeSet<u16> {
    let mut starts = BTreeSet::new();
    for slot in slots {
        let end = if slot.end <= slot.start {
            DAY_MINUTES
        } else {
            slot.end
        };
        let mut t = slot.start;
        while t + SLOT_MINUTES <= end {
            starts.insert(t);
            t += SLOT_MINUTES;
        }
    }
    starts
}

/// Mark each start time against booked `[start, end)` minute ranges
pub fn mark_booked(starts: &BTreeSet<u16>, booked: &[(u16, u16)]) -> Vec<SlotAvailability> {
    starts
        .iter()
        .map(|&t| SlotAvailability {
            time: format_clock(t),
            is_available: !booked.iter().any(|&(start, end)| start <= t && t < end),
        })
        .collect()
}

/// Clip a booking window to `day_start..day_start + 24h` as minute offsets
fn clip_to_day(day_start: NaiveDateTime, start: NaiveDateTime, end: NaiveDateTime) -> Option<(u16, u16)> {
    let day_end = day_start + Duration::days(1);
    if end <= day_start || start >= day_end {
        return None;
    }
    let from = (start.max(day_start) - day_start).num_minutes();
    let to = (end.min(day_end) - day_start).num_minutes();
    Some((from as u16, to as u16))
}

/// Bookable start times for `buddy_id` on `date`, ordered and de-duplicated.
///
/// Read-only: calling it twice without an intervening booking returns the
/// same list.
pub async fn buddy_availability(
    db: &DbPool,
    buddy_id: &str,
    date: NaiveDate,
    default_slot: TimeSlot,
) -> ServiceResult<Vec<SlotAvailability>> {
    let availability: Option<String> = sqlx::query_scalar(
        r#"
        SELECT p.availability
        FROM buddy_profiles p JOIN users u ON u.id = p.user_id
        WHERE p.user_id = ? AND u.is_active = 1
        "#,
    )
    .bind(buddy_id)
    .fetch_optional(db)
    .await?;
    let availability = availability
        .map(|json| WeeklyAvailability::parse(&json))
        .ok_or_else(|| ServiceError::not_found("Buddy"))?;

    let day_start = date.and_time(NaiveTime::MIN);
    let day_end = day_start + Duration::days(1);

    let sql = format!(
        "SELECT start_at, end_at FROM bookings \
         WHERE buddy_id = ? AND status IN ({}) AND start_at < ? AND end_at > ? \
         ORDER BY start_at",
        BookingStatus::slot_blocking_sql()
    );
    let windows: Vec<(String, String)> = sqlx::query_as(&sql)
        .bind(buddy_id)
        .bind(format_local_datetime(&day_end))
        .bind(format_local_datetime(&day_start))
        .fetch_all(db)
        .await?;

    let booked: Vec<(u16, u16)> = windows
        .iter()
        .filter_map(|(start, end)| {
            let start = parse_local_datetime(start)?;
            let end = parse_local_datetime(end)?;
            clip_to_day(day_start, start, end)
        })
        .collect();

    let slots = slots_for_day(&availability, date.weekday(), default_slot);
    let starts = expand_start_times(&slots);

    tracing::debug!(
        buddy_id = %buddy_id,
        date = %date,
        slots = starts.len(),
        booked = booked.len(),
        "Availability computed"
    );

    Ok(mark_booked(&starts, &booked))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BookingConfig;
    use crate::db::test_support::{insert_user, test_pool};
    use crate::db::{BookingStatus, CreateBookingRequest, UserRole};
    use crate::engine::{Actor, BookingManager};
    use chrono::Weekday;

    fn slot(s: &str) -> TimeSlot {
        s.parse().unwrap()
    }

    fn times(list: &[SlotAvailability]) -> Vec<&str> {
        list.iter().map(|s| s.time.as_str()).collect()
    }

    #[test]
    fn test_expand_requires_full_hour() {
        let starts = expand_start_times(&[slot("09:00-12:30")]);
        assert_eq!(starts.into_iter().collect::<Vec<_>>(), vec![540, 600, 660]);

        let starts = expand_start_times(&[slot("09:30-10:00")]);
        assert!(starts.is_empty());
    }

    #[test]
    fn test_overlapping_slots_are_deduplicated_and_ordered() {
        let starts = expand_start_times(&[slot("13:00-15:00"), slot("09:00-11:00"), slot("10:00-12:00")]);
        let marked = mark_booked(&starts, &[]);
        assert_eq!(times(&marked), vec!["09:00", "10:00", "11:00", "13:00", "14:00"]);
    }

    #[test]
    fn test_midnight_slot_stops_at_hour_24() {
        let starts = expand_start_times(&[slot("22:00-02:00")]);
        let marked = mark_booked(&starts, &[]);
        assert_eq!(times(&marked), vec!["22:00", "23:00"]);

        let starts = expand_start_times(&[slot("21:00-24:00")]);
        assert_eq!(starts.len(), 3);
    }

    #[test]
    fn test_unset_day_uses_default_but_empty_day_is_closed() {
        let availability = WeeklyAvailability::parse(r#"{"sunday": []}"#);
        let default_slot = slot("09:00-17:00");

        assert_eq!(slots_for_day(&availability, Weekday::Mon, default_slot), vec![default_slot]);
        assert!(slots_for_day(&availability, Weekday::Sun, default_slot).is_empty());
    }

    #[test]
    fn test_booked_range_is_half_open() {
        let starts = expand_start_times(&[slot("09:00-13:00")]);
        let marked = mark_booked(&starts, &[(9 * 60, 11 * 60)]);
        let available: Vec<bool> = marked.iter().map(|s| s.is_available).collect();
        assert_eq!(available, vec![false, false, true, true]);
    }

    #[test]
    fn test_clip_to_day_handles_bookings_crossing_midnight() {
        let day = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let start = day - Duration::hours(1);
        let end = day + Duration::hours(2);
        assert_eq!(clip_to_day(day, start, end), Some((0, 120)));
        assert_eq!(clip_to_day(day, start, day), None);
    }

    #[tokio::test]
    async fn test_availability_marks_bookings_and_is_idempotent() {
        let (pool, _dir) = test_pool().await;
        let traveller = insert_user(&pool, "Tom", UserRole::Traveller).await;
        let buddy = insert_user(&pool, "Linh", UserRole::TourGuide).await;
        let manager = BookingManager::new(pool.clone(), BookingConfig::default());
        let traveller = Actor::new(traveller, UserRole::Traveller);

        // 2024-06-01 is a Saturday with no configured hours
        let booking = manager
            .create(
                &traveller,
                CreateBookingRequest {
                    buddy_id: Some(buddy.clone()),
                    destination_id: Some("hanoi".to_string()),
                    start_date: Some("2024-06-01".to_string()),
                    start_time: Some("10:00".to_string()),
                    duration: Some(2),
                    number_of_people: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let first = buddy_availability(&pool, &buddy, date, slot("09:00-17:00")).await.unwrap();
        let second = buddy_availability(&pool, &buddy, date, slot("09:00-17:00")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 8);

        let unavailable: Vec<&str> = first
            .iter()
            .filter(|s| !s.is_available)
            .map(|s| s.time.as_str())
            .collect();
        assert_eq!(unavailable, vec!["10:00", "11:00"]);

        // A cancelled booking no longer blocks its hours
        let buddy_actor = Actor::new(buddy.clone(), UserRole::TourGuide);
        manager
            .transition(&buddy_actor, &booking.id, BookingStatus::Cancelled, None)
            .await
            .unwrap();
        let after = buddy_availability(&pool, &buddy, date, slot("09:00-17:00")).await.unwrap();
        assert!(after.iter().all(|s| s.is_available));
    }

    #[tokio::test]
    async fn test_unknown_buddy_is_not_found() {
        let (pool, _dir) = test_pool().await;
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let result = buddy_availability(&pool, "nobody", date, slot("09:00-17:00")).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }
}
