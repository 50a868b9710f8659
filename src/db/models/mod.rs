//! Database models split into domain-specific modules.
//!
//! Everything is re-exported so callers can use `crate::db::Booking` etc.

pub mod booking;
pub mod buddy;
pub mod chat;
pub mod common;
pub mod destination;
pub mod review;
pub mod user;

pub use booking::*;
pub use buddy::*;
pub use chat::*;
pub use common::*;
pub use destination::*;
pub use review::*;
pub use user::*;
