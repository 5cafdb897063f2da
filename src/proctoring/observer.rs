use std::collections::HashMap;

use super::connection::{ConnectionHandle, ConnectionId};
use super::messages::ServerEvent;

/// Result of fanning one event out to every observer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Observers whose queue was full; the event was dropped for them
    pub dropped: usize,
    /// Observers whose connection is already gone
    pub closed: Vec<ConnectionId>,
}

/// Admin connections subscribed to the monitoring room.
#[derive(Debug, Default)]
pub struct ObserverRegistry {
    observers: HashMap<ConnectionId, ConnectionHandle>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the connection was already an observer.
    pub fn join(&mut self, connection: ConnectionHandle) -> bool {
        self.observers.insert(connection.id(), connection).is_none()
    }

    pub fn leave(&mut self, connection_id: ConnectionId) -> bool {
        self.observers.remove(&connection_id).is_some()
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.observers.contains_key(&connection_id)
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Best-effort send to every observer. Never blocks and never retries.
    pub fn broadcast(&self, event: &ServerEvent) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for (connection_id, observer) in &self.observers {
            match observer.send(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) if e.is_disconnect() => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        event = event.name(),
                        "Skipping closed observer"
                    );
                    report.closed.push(*connection_id);
                }
                Err(e) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        event = event.name(),
                        error = %e,
                        "Dropped event for slow observer"
                    );
                    report.dropped += 1;
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_leave() {
        let mut observers = ObserverRegistry::new();
        let (handle, _rx) = ConnectionHandle::channel(4);

        assert!(observers.join(handle.clone()));
        assert!(!observers.join(handle.clone()));
        assert!(observers.contains(handle.id()));
        assert_eq!(observers.len(), 1);

        assert!(observers.leave(handle.id()));
        assert!(!observers.leave(handle.id()));
        assert!(observers.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_observer() {
        let mut observers = ObserverRegistry::new();
        let (a, mut rx_a) = ConnectionHandle::channel(4);
        let (b, mut rx_b) = ConnectionHandle::channel(4);
        observers.join(a);
        observers.join(b);

        let report = observers.broadcast(&ServerEvent::Pong);
        assert_eq!(report.delivered, 2);
        assert_eq!(rx_a.recv().await, Some(ServerEvent::Pong));
        assert_eq!(rx_b.recv().await, Some(ServerEvent::Pong));
    }

    #[tokio::test]
    async fn test_broadcast_continues_past_closed_and_slow_observers() {
        let mut observers = ObserverRegistry::new();
        let (gone, gone_rx) = ConnectionHandle::channel(4);
        let (slow, _slow_rx) = ConnectionHandle::channel(1);
        let (healthy, mut healthy_rx) = ConnectionHandle::channel(4);
        drop(gone_rx);
        slow.send(ServerEvent::Pong).unwrap();

        observers.join(gone.clone());
        observers.join(slow);
        observers.join(healthy);

        let report = observers.broadcast(&ServerEvent::Pong);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.closed, vec![gone.id()]);
        assert_eq!(healthy_rx.recv().await, Some(ServerEvent::Pong));
    }
}
