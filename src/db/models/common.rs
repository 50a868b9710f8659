//! Common types and utilities shared across models.

use chrono::NaiveDateTime;

/// Storage format for booking wall-clock times; sorts correctly as text
pub const LOCAL_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Helper to parse a JSON string list column (languages, activity ids)
pub fn parse_json_list(json: &str) -> Vec<String> {
    serde_json::from_str(json).unwrap_or_default()
}

/// Helper to serialize a string list for a JSON column
pub fn serialize_json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

pub fn format_local_datetime(value: &NaiveDateTime) -> String {
    value.format(LOCAL_DATETIME_FORMAT).to_string()
}

pub fn parse_local_datetime(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, LOCAL_DATETIME_FORMAT).ok()
}
