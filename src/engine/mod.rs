//! Marketplace domain logic: booking lifecycle, availability, counters and
//! reviews. Nothing in here knows about HTTP.

pub mod availability;
pub mod lifecycle;
pub mod reviews;
pub mod stats;

pub use availability::*;
pub use lifecycle::*;
pub use reviews::*;
pub use stats::*;

use crate::db::{BookingStatus, User, UserRole};

/// Errors raised by the domain services. Converted to HTTP responses by
/// `api::error` and to `error` events by the socket handler.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Cannot change booking status from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("The buddy already has a booking during this time")]
    SlotConflict,

    #[error("{0}")]
    Conflict(String),

    #[error("{message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ServiceError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// The authenticated caller of a domain operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: UserRole,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: UserRole) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            role: user.role_enum(),
        }
    }
}
