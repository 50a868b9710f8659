use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::ApiError;
use crate::db::{
    BookingResponse, BookingStatus, CreateBookingRequest, PaymentStatus, UpdateBookingStatusRequest,
    UpdatePaymentRequest,
};
use crate::AppState;

/// Create a pending booking for the calling traveller
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingResponse>), ApiError> {
    let booking = state.bookings.create(&auth.actor(), req).await?;
    Ok((StatusCode::CREATED, Json(BookingResponse::from(booking))))
}

pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(booking_id): Path<String>,
) -> Result<Json<BookingResponse>, ApiError> {
    let booking = state.bookings.get(&auth.actor(), &booking_id).await?;
    Ok(Json(BookingResponse::from(booking)))
}

/// Move a booking through its lifecycle
pub async fn update_booking_status(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(booking_id): Path<String>,
    Json(req): Json<UpdateBookingStatusRequest>,
) -> Result<Json<BookingResponse>, ApiError> {
    let target: BookingStatus = req
        .status
        .parse()
        .map_err(|e: String| ApiError::validation_field("status", e))?;

    let booking = state
        .bookings
        .transition(&auth.actor(), &booking_id, target, req.reason)
        .await?;
    Ok(Json(BookingResponse::from(booking)))
}

pub async fn update_payment_status(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(booking_id): Path<String>,
    Json(req): Json<UpdatePaymentRequest>,
) -> Result<Json<BookingResponse>, ApiError> {
    let status: PaymentStatus = req
        .payment_status
        .parse()
        .map_err(|e: String| ApiError::validation_field("paymentStatus", e))?;

    let booking = state
        .bookings
        .update_payment(&auth.actor(), &booking_id, status)
        .await?;
    Ok(Json(BookingResponse::from(booking)))
}

/// Bookings where the user is the traveller or the buddy (self or admin)
pub async fn list_user_bookings(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<BookingResponse>>, ApiError> {
    let bookings = state.bookings.list_for_user(&auth.actor(), &user_id).await?;
    Ok(Json(bookings.into_iter().map(BookingResponse::from).collect()))
}
