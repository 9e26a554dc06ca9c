//! Registry of connected client sessions.
//!
//! The registry is owned and mutated by the server task only. Sessions
//! never add or remove entries themselves; they just clear their own
//! liveness flag, which the next housekeeping pass turns into removal.

use log::{debug, info};

/// Notification contract every connected session fulfils.
pub trait ClientSession: Send + Sync {
    /// Session ID assigned by the registry.
    fn id(&self) -> u32;

    /// False once the connection is gone.
    fn is_alive(&self) -> bool;

    fn on_channel_list_changed(&self);

    fn on_recordings_changed(&self);

    fn on_timers_changed(&self);
}

/// Ordered collection of connected sessions.
pub struct SessionRegistry {
    sessions: Vec<Box<dyn ClientSession>>,
    /// Next session ID. Wraparound is not expected within a process lifetime.
    next_id: u32,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Vec::new(),
            next_id: 1,
        }
    }

    /// Allocate the ID for the next session.
    pub fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    pub fn insert(&mut self, session: Box<dyn ClientSession>) {
        debug!("[Session {}] registered", session.id());
        self.sessions.push(session);
    }

    /// Remove a session by ID. Dropping it closes the connection.
    #[cfg(test)]
    pub fn remove(&mut self, id: u32) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id() != id);
        self.sessions.len() != before
    }

    /// Remove every session whose liveness flag is cleared.
    ///
    /// Returns the number of sessions removed.
    pub fn reap(&mut self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|s| {
            let alive = s.is_alive();
            if !alive {
                info!("[Session {}] client disconnected, removing", s.id());
            }
            alive
        });
        before - self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Session IDs in registry order.
    #[cfg(test)]
    pub fn ids(&self) -> Vec<u32> {
        self.sessions.iter().map(|s| s.id()).collect()
    }

    pub fn notify_channel_list_changed(&self) {
        info!("Channel list changed, notifying {} sessions", self.sessions.len());
        self.sessions.iter().for_each(|s| s.on_channel_list_changed());
    }

    pub fn notify_recordings_changed(&self) {
        debug!("Recordings changed, notifying {} sessions", self.sessions.len());
        self.sessions.iter().for_each(|s| s.on_recordings_changed());
    }

    pub fn notify_timers_changed(&self) {
        debug!("Timers changed, notifying {} sessions", self.sessions.len());
        self.sessions.iter().for_each(|s| s.on_timers_changed());
    }

    /// Drop every session.
    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{EventLog, FakeSession};
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_next_id_increments() {
        let mut registry = SessionRegistry::new();
        assert_eq!(registry.next_id(), 1);
        assert_eq!(registry.next_id(), 2);

        registry.next_id = u32::MAX;
        assert_eq!(registry.next_id(), u32::MAX);
        assert_eq!(registry.next_id(), 0);
    }

    #[test]
    fn test_broadcast_in_registry_order() {
        let events = EventLog::default();
        let mut registry = SessionRegistry::new();
        for _ in 0..3 {
            let id = registry.next_id();
            registry.insert(Box::new(FakeSession::new(id, &events).0));
        }

        registry.notify_timers_changed();
        registry.notify_channel_list_changed();
        assert_eq!(
            *events.lock(),
            vec![
                (1, "timers"),
                (2, "timers"),
                (3, "timers"),
                (1, "channels"),
                (2, "channels"),
                (3, "channels"),
            ]
        );
    }

    #[test]
    fn test_reaped_session_gets_no_notifications() {
        let events = EventLog::default();
        let mut registry = SessionRegistry::new();
        let (first, first_alive) = FakeSession::new(1, &events);
        let (second, _second_alive) = FakeSession::new(2, &events);
        registry.insert(Box::new(first));
        registry.insert(Box::new(second));

        first_alive.store(false, Ordering::Release);
        assert_eq!(registry.reap(), 1);
        assert_eq!(registry.ids(), vec![2]);

        registry.notify_recordings_changed();
        assert_eq!(*events.lock(), vec![(2, "recordings")]);
    }

    #[test]
    fn test_remove_and_clear() {
        let events = EventLog::default();
        let mut registry = SessionRegistry::new();
        registry.insert(Box::new(FakeSession::new(5, &events).0));
        registry.insert(Box::new(FakeSession::new(6, &events).0));

        assert!(registry.remove(5));
        assert!(!registry.remove(5));
        assert_eq!(registry.len(), 1);
        registry.clear();
        assert!(registry.is_empty());
    }
}
