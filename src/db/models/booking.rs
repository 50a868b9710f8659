//! Booking models and the booking status state machine.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::common::parse_json_list;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    Rejected,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 5] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
        BookingStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Rejected => "rejected",
        }
    }

    /// Statuses this one may move to
    pub fn allowed_targets(&self) -> &'static [BookingStatus] {
        match self {
            BookingStatus::Pending => &[
                BookingStatus::Confirmed,
                BookingStatus::Cancelled,
                BookingStatus::Rejected,
            ],
            BookingStatus::Confirmed => &[BookingStatus::Completed, BookingStatus::Cancelled],
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::Rejected => &[],
        }
    }

    pub fn can_transition_to(&self, target: BookingStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_targets().is_empty()
    }

    /// Pending and confirmed bookings hold their time window
    pub fn blocks_slot(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    /// Slot-holding statuses as a quoted SQL list for `status IN (...)`
    pub fn slot_blocking_sql() -> String {
        Self::ALL
            .iter()
            .filter(|status| status.blocks_slot())
            .map(|status| format!("'{}'", status.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" | "canceled" => Ok(BookingStatus::Cancelled),
            "rejected" => Ok(BookingStatus::Rejected),
            _ => Err(format!("Unknown booking status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "refunded" => Ok(PaymentStatus::Refunded),
            "failed" => Ok(PaymentStatus::Failed),
            _ => Err(format!("Unknown payment status: {}", s)),
        }
    }
}

/// Which party ended a booking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelledBy {
    Traveller,
    Buddy,
    Admin,
}

impl CancelledBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelledBy::Traveller => "traveller",
            CancelledBy::Buddy => "buddy",
            CancelledBy::Admin => "admin",
        }
    }
}

impl std::str::FromStr for CancelledBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "traveller" => Ok(CancelledBy::Traveller),
            "buddy" => Ok(CancelledBy::Buddy),
            "admin" => Ok(CancelledBy::Admin),
            _ => Err(format!("Unknown cancelling party: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Booking {
    pub id: String,
    pub traveller_id: String,
    pub buddy_id: String,
    pub destination_id: String,
    pub activities: String,
    /// Local wall-clock start, `YYYY-MM-DDTHH:MM:SS`
    pub start_at: String,
    pub end_at: String,
    pub duration: i64,
    pub number_of_people: i64,
    pub total_price: f64,
    pub payment_status: String,
    pub status: String,
    pub special_requests: Option<String>,
    pub meeting_point: Option<String>,
    pub confirmation_date: Option<String>,
    pub completion_date: Option<String>,
    pub cancellation_date: Option<String>,
    pub cancelled_by: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Booking {
    /// Stored values are only written through `BookingStatus::as_str`
    pub fn status_enum(&self) -> BookingStatus {
        self.status.parse().unwrap_or(BookingStatus::Pending)
    }

    pub fn payment_status_enum(&self) -> PaymentStatus {
        self.payment_status.parse().unwrap_or(PaymentStatus::Pending)
    }

    pub fn is_party(&self, user_id: &str) -> bool {
        self.traveller_id == user_id || self.buddy_id == user_id
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResponse {
    pub id: String,
    pub traveller_id: String,
    pub buddy_id: String,
    pub destination_id: String,
    pub activities: Vec<String>,
    pub start_date: String,
    pub start_time: String,
    pub end_at: String,
    pub duration: i64,
    pub number_of_people: i64,
    pub total_price: f64,
    pub payment_status: PaymentStatus,
    pub status: BookingStatus,
    pub special_requests: Option<String>,
    pub meeting_point: Option<String>,
    pub confirmation_date: Option<String>,
    pub completion_date: Option<String>,
    pub cancellation_date: Option<String>,
    pub cancelled_by: Option<CancelledBy>,
    pub cancellation_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Booking> for BookingResponse {
    fn from(booking: Booking) -> Self {
        let status = booking.status_enum();
        let payment_status = booking.payment_status_enum();
        let (start_date, start_time) = match booking.start_at.split_once('T') {
            Some((date, time)) => (date.to_string(), time.chars().take(5).collect()),
            None => (booking.start_at.clone(), String::new()),
        };
        Self {
            id: booking.id,
            traveller_id: booking.traveller_id,
            buddy_id: booking.buddy_id,
            destination_id: booking.destination_id,
            activities: parse_json_list(&booking.activities),
            start_date,
            start_time,
            end_at: booking.end_at,
            duration: booking.duration,
            number_of_people: booking.number_of_people,
            total_price: booking.total_price,
            payment_status,
            status,
            special_requests: booking.special_requests,
            meeting_point: booking.meeting_point,
            confirmation_date: booking.confirmation_date,
            completion_date: booking.completion_date,
            cancellation_date: booking.cancellation_date,
            cancelled_by: booking.cancelled_by.and_then(|s| s.parse().ok()),
            cancellation_reason: booking.cancellation_reason,
            created_at: booking.created_at,
            updated_at: booking.updated_at,
        }
    }
}

/// Booking request body. Required fields are optional here so that
/// missing ones surface as field-level validation errors.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub buddy_id: Option<String>,
    pub destination_id: Option<String>,
    #[serde(default)]
    pub activities: Vec<String>,
    /// `YYYY-MM-DD`
    pub start_date: Option<String>,
    /// `HH:MM`
    pub start_time: Option<String>,
    pub duration: Option<i64>,
    pub number_of_people: Option<i64>,
    pub total_price: Option<f64>,
    pub special_requests: Option<String>,
    pub meeting_point: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBookingStatusRequest {
    pub status: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePaymentRequest {
    pub payment_status: String,
}
