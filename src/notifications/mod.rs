//! Outbound notifications. Only transactional email today.

pub mod email;

pub use email::SystemEmailService;
