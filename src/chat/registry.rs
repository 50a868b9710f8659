//! Live socket connections, keyed by user id.
//!
//! One connection per user: a new connection replaces the previous one.
//! Each handle wraps the sending half of the connection's outbound channel;
//! the socket's writer task drains the other half.

use dashmap::DashMap;
use tokio::sync::mpsc;

use super::events::ServerEvent;

pub type EventSender = mpsc::UnboundedSender<ServerEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ServerEvent>;

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    connection_id: String,
    sender: EventSender,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task should drain
    pub fn channel() -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                connection_id: uuid::Uuid::new_v4().to_string(),
                sender,
            },
            receiver,
        )
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Queue an event; false when the connection's writer is gone
    pub fn send(&self, event: ServerEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` for `user_id`, returning the handle it replaced
    pub fn register(&self, user_id: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let previous = self.connections.insert(user_id.to_string(), handle);
        if previous.is_some() {
            tracing::debug!(user_id = %user_id, "Replaced existing socket connection");
        }
        previous
    }

    /// Remove the entry only if it still belongs to `connection_id`
    pub fn unregister(&self, user_id: &str, connection_id: &str) -> bool {
        self.connections
            .remove_if(user_id, |_, handle| handle.connection_id == connection_id)
            .is_some()
    }

    /// Deliver an event to one user. Returns false when the user is offline.
    pub fn send(&self, user_id: &str, event: ServerEvent) -> bool {
        let handle = match self.connections.get(user_id) {
            Some(entry) => entry.value().clone(),
            None => return false,
        };
        handle.send(event)
    }

    /// Deliver an event to every connected user except `skip`
    pub fn broadcast_except(&self, skip: Option<&str>, event: &ServerEvent) -> usize {
        let handles: Vec<ConnectionHandle> = self
            .connections
            .iter()
            .filter(|entry| Some(entry.key().as_str()) != skip)
            .map(|entry| entry.value().clone())
            .collect();
        handles
            .into_iter()
            .filter(|handle| handle.send(event.clone()))
            .count()
    }

    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        self.broadcast_except(None, event)
    }

    pub fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        users.sort();
        users
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.connections.contains_key(user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping() -> ServerEvent {
        ServerEvent::OnlineUsers(vec![])
    }

    #[test]
    fn test_send_reaches_registered_user() {
        let registry = ConnectionRegistry::new();
        let (handle, mut rx) = ConnectionHandle::channel();
        registry.register("u1", handle);

        assert!(registry.is_online("u1"));
        assert!(registry.send("u1", ping()));
        assert_eq!(rx.try_recv().unwrap(), ping());
        assert!(!registry.send("u2", ping()));
    }

    #[test]
    fn test_last_connect_wins() {
        let registry = ConnectionRegistry::new();
        let (first, mut first_rx) = ConnectionHandle::channel();
        let (second, mut second_rx) = ConnectionHandle::channel();
        let first_id = first.connection_id().to_string();

        registry.register("u1", first);
        let replaced = registry.register("u1", second).unwrap();
        assert_eq!(replaced.connection_id(), first_id);

        registry.send("u1", ping());
        assert!(first_rx.try_recv().is_err());
        assert!(second_rx.try_recv().is_ok());
    }

    #[test]
    fn test_stale_unregister_keeps_newer_connection() {
        let registry = ConnectionRegistry::new();
        let (first, _first_rx) = ConnectionHandle::channel();
        let (second, _second_rx) = ConnectionHandle::channel();
        let first_id = first.connection_id().to_string();
        let second_id = second.connection_id().to_string();

        registry.register("u1", first);
        registry.register("u1", second);

        assert!(!registry.unregister("u1", &first_id));
        assert!(registry.is_online("u1"));
        assert!(registry.unregister("u1", &second_id));
        assert!(!registry.is_online("u1"));
    }

    #[test]
    fn test_broadcast_and_online_users() {
        let registry = ConnectionRegistry::new();
        let (a, mut a_rx) = ConnectionHandle::channel();
        let (b, mut b_rx) = ConnectionHandle::channel();
        registry.register("b", b);
        registry.register("a", a);

        assert_eq!(registry.online_users(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.broadcast_except(Some("a"), &ping()), 1);
        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_ok());

        assert_eq!(registry.broadcast(&ping()), 2);
    }

    #[test]
    fn test_send_to_closed_connection_reports_failure() {
        let registry = ConnectionRegistry::new();
        let (handle, rx) = ConnectionHandle::channel();
        registry.register("u1", handle);
        drop(rx);
        assert!(!registry.send("u1", ping()));
    }
}
