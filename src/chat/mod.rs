//! Realtime messaging: connection registry, socket event contracts and the
//! message service that persists and fans out chat traffic.

pub mod events;
pub mod registry;
mod service;

pub use events::{ClientEvent, ServerEvent};
pub use registry::{ConnectionHandle, ConnectionRegistry, EventReceiver};
pub use service::*;
