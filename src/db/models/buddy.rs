//! Buddy (tour-guide) profile models and weekly availability.

use chrono::{DateTime, Duration, Utc, Weekday};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;

use super::common::parse_json_list;

/// Minutes of inactivity after which a buddy without a live socket is no
/// longer shown as available now
pub const AVAILABLE_NOW_WINDOW_MINUTES: i64 = 5;

/// A contiguous working interval, written as `HH:MM-HH:MM`.
///
/// Times are minutes since midnight. `end` may be `24:00`. A slot whose end
/// is not after its start is accepted but treated as running until midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeSlot {
    pub start: u16,
    pub end: u16,
}

impl TimeSlot {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }
}

/// Parse `HH:MM` into minutes since midnight (`24:00` allowed)
pub fn parse_clock(value: &str) -> Option<u16> {
    let (h, m) = value.trim().split_once(':')?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return None;
    }
    let hours: u16 = h.parse().ok()?;
    let minutes: u16 = m.parse().ok()?;
    if minutes >= 60 || hours > 24 || (hours == 24 && minutes != 0) {
        return None;
    }
    Some(hours * 60 + minutes)
}

pub fn format_clock(minutes: u16) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

impl std::str::FromStr for TimeSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| format!("Invalid slot '{}': expected HH:MM-HH:MM", s))?;
        let start = parse_clock(start).ok_or_else(|| format!("Invalid start time in slot '{}'", s))?;
        let end = parse_clock(end).ok_or_else(|| format!("Invalid end time in slot '{}'", s))?;
        if start >= 24 * 60 {
            return Err(format!("Slot '{}' cannot start at 24:00", s));
        }
        Ok(TimeSlot { start, end })
    }
}

impl TryFrom<String> for TimeSlot {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeSlot> for String {
    fn from(slot: TimeSlot) -> Self {
        slot.to_string()
    }
}

impl std::fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", format_clock(self.start), format_clock(self.end))
    }
}

/// Weekly working hours. `None` for a day means "never configured"
/// (the default slot applies); an empty list means "not working".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyAvailability {
    #[serde(default, alias = "Monday", skip_serializing_if = "Option::is_none")]
    pub monday: Option<Vec<TimeSlot>>,
    #[serde(default, alias = "Tuesday", skip_serializing_if = "Option::is_none")]
    pub tuesday: Option<Vec<TimeSlot>>,
    #[serde(default, alias = "Wednesday", skip_serializing_if = "Option::is_none")]
    pub wednesday: Option<Vec<TimeSlot>>,
    #[serde(default, alias = "Thursday", skip_serializing_if = "Option::is_none")]
    pub thursday: Option<Vec<TimeSlot>>,
    #[serde(default, alias = "Friday", skip_serializing_if = "Option::is_none")]
    pub friday: Option<Vec<TimeSlot>>,
    #[serde(default, alias = "Saturday", skip_serializing_if = "Option::is_none")]
    pub saturday: Option<Vec<TimeSlot>>,
    #[serde(default, alias = "Sunday", skip_serializing_if = "Option::is_none")]
    pub sunday: Option<Vec<TimeSlot>>,
}

impl WeeklyAvailability {
    pub fn day(&self, weekday: Weekday) -> Option<&[TimeSlot]> {
        let slots = match weekday {
            Weekday::Mon => &self.monday,
            Weekday::Tue => &self.tuesday,
            Weekday::Wed => &self.wednesday,
            Weekday::Thu => &self.thursday,
            Weekday::Fri => &self.friday,
            Weekday::Sat => &self.saturday,
            Weekday::Sun => &self.sunday,
        };
        slots.as_deref()
    }

    pub fn parse(json: &str) -> Self {
        serde_json::from_str(json).unwrap_or_default()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A buddy profile joined with the owning user's public fields
#[derive(Debug, Clone, FromRow)]
pub struct BuddyRow {
    pub id: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub is_active: bool,
    pub last_online: Option<String>,
    pub bio: Option<String>,
    pub languages: String,
    pub hourly_rate: f64,
    pub destination_id: Option<String>,
    pub related_activities: String,
    pub availability: String,
    pub rating_average: f64,
    pub rating_count: i64,
    pub rating_1: i64,
    pub rating_2: i64,
    pub rating_3: i64,
    pub rating_4: i64,
    pub rating_5: i64,
    pub total_bookings: i64,
    pub completed_bookings: i64,
    pub cancellation_rate: f64,
}

/// Column list matching `BuddyRow`; join `users u` with `buddy_profiles p`
pub const BUDDY_COLUMNS: &str = "u.id, u.name, u.avatar_url, u.is_active, u.last_online, \
    p.bio, p.languages, p.hourly_rate, p.destination_id, p.related_activities, p.availability, \
    p.rating_average, p.rating_count, p.rating_1, p.rating_2, p.rating_3, p.rating_4, p.rating_5, \
    p.total_bookings, p.completed_bookings, p.cancellation_rate";

impl BuddyRow {
    pub fn rating(&self) -> RatingSummary {
        RatingSummary::from_counts(
            [self.rating_1, self.rating_2, self.rating_3, self.rating_4, self.rating_5],
            self.rating_average,
        )
    }

    /// Whether `last_online` falls inside the "available now" window
    pub fn recently_online(&self, now: DateTime<Utc>) -> bool {
        self.last_online
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| now - t.with_timezone(&Utc) <= Duration::minutes(AVAILABLE_NOW_WINDOW_MINUTES))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingSummary {
    pub average: f64,
    pub count: i64,
    /// Number of reviews per star value, keyed 1..=5
    pub breakdown: BTreeMap<u8, i64>,
}

impl RatingSummary {
    pub fn from_counts(counts: [i64; 5], average: f64) -> Self {
        let breakdown = counts
            .iter()
            .enumerate()
            .map(|(i, c)| (i as u8 + 1, *c))
            .collect();
        Self {
            average,
            count: counts.iter().sum(),
            breakdown,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuddyResponse {
    pub id: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub languages: Vec<String>,
    pub hourly_rate: f64,
    pub destination_id: Option<String>,
    pub related_activities: Vec<String>,
    pub availability: WeeklyAvailability,
    pub rating: RatingSummary,
    pub total_bookings: i64,
    pub completed_bookings: i64,
    pub cancellation_rate: f64,
    pub is_available_now: bool,
    pub is_active: bool,
}

impl BuddyResponse {
    pub fn from_row(row: BuddyRow, connected: bool) -> Self {
        let is_available_now = row.is_active && (connected || row.recently_online(Utc::now()));
        let rating = row.rating();
        Self {
            languages: parse_json_list(&row.languages),
            related_activities: parse_json_list(&row.related_activities),
            availability: WeeklyAvailability::parse(&row.availability),
            rating,
            is_available_now,
            id: row.id,
            name: row.name,
            avatar_url: row.avatar_url,
            bio: row.bio,
            hourly_rate: row.hourly_rate,
            destination_id: row.destination_id,
            total_bookings: row.total_bookings,
            completed_bookings: row.completed_bookings,
            cancellation_rate: row.cancellation_rate,
            is_active: row.is_active,
        }
    }
}

/// Partial update of the caller's own buddy profile
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBuddyProfileRequest {
    pub bio: Option<String>,
    pub languages: Option<Vec<String>>,
    pub hourly_rate: Option<f64>,
    pub availability: Option<WeeklyAvailability>,
    pub destination_id: Option<String>,
    pub related_activities: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuddyListQuery {
    pub destination_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    /// Calendar date, `YYYY-MM-DD`
    pub date: String,
}
