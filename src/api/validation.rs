//! Input validation for API requests.
//!
//! This module provides validation functions for API request data,
//! ensuring all inputs meet the required format and constraints.
//!
//! For collecting multiple validation errors and returning them as an ApiError,
//! use the `ValidationErrorBuilder` from the `error` module.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Regex for validating email addresses (pragmatic, not RFC 5322)
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?)+$"
    ).unwrap();

    /// Regex for calendar dates (YYYY-MM-DD)
    static ref DATE_REGEX: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();

    /// Regex for one-time codes (6 digits)
    static ref OTP_REGEX: Regex = Regex::new(r"^\d{6}$").unwrap();

    /// Regex for phone numbers (digits, spaces, dashes, optional leading +)
    static ref PHONE_REGEX: Regex = Regex::new(r"^\+?[0-9][0-9 -]{6,19}$").unwrap();
}

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }

    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Validate a password for a new account
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.len() < 8 {
        return Err("Password must be at least 8 characters".to_string());
    }

    if password.len() > 128 {
        return Err("Password is too long (max 128 characters)".to_string());
    }

    Ok(())
}

/// Validate a display name
pub fn validate_name(name: &str) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("Name is required".to_string());
    }

    if trimmed.chars().count() > 100 {
        return Err("Name is too long (max 100 characters)".to_string());
    }

    Ok(())
}

/// Validate an optional phone number
pub fn validate_phone(phone: &Option<String>) -> Result<(), String> {
    if let Some(p) = phone {
        if p.is_empty() {
            return Ok(()); // Empty string treated as no phone
        }

        if !PHONE_REGEX.is_match(p) {
            return Err("Invalid phone number format".to_string());
        }
    }

    Ok(())
}

/// Validate a one-time code
pub fn validate_otp(otp: &str) -> Result<(), String> {
    if !OTP_REGEX.is_match(otp) {
        return Err("OTP must be 6 digits".to_string());
    }
    Ok(())
}

/// Parse a calendar date (YYYY-MM-DD)
pub fn parse_date(date: &str) -> Result<NaiveDate, String> {
    if !DATE_REGEX.is_match(date) {
        return Err("Date must be in YYYY-MM-DD format".to_string());
    }

    NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| format!("Invalid date: {}", date))
}

/// Validate an hourly rate
pub fn validate_hourly_rate(rate: f64) -> Result<(), String> {
    if !rate.is_finite() || rate < 0.0 {
        return Err("Hourly rate must be a non-negative number".to_string());
    }

    if rate > 10_000.0 {
        return Err("Hourly rate is too high (max 10000)".to_string());
    }

    Ok(())
}
