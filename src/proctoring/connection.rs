use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::messages::ServerEvent;
use crate::error::{ProctorError, Result};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Transport-assigned identity of a single socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where outbound events for one connection go.
///
/// Delivery must never block: implementations either accept the event,
/// drop it (`QueueFull`) or report the peer as gone (`ConnectionClosed`).
pub trait EventSink: Send + Sync {
    fn deliver(&self, connection_id: ConnectionId, event: ServerEvent) -> Result<()>;
}

impl EventSink for mpsc::Sender<ServerEvent> {
    fn deliver(&self, connection_id: ConnectionId, event: ServerEvent) -> Result<()> {
        self.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ProctorError::QueueFull(connection_id),
            mpsc::error::TrySendError::Closed(_) => ProctorError::ConnectionClosed(connection_id),
        })
    }
}

impl EventSink for mpsc::UnboundedSender<ServerEvent> {
    fn deliver(&self, connection_id: ConnectionId, event: ServerEvent) -> Result<()> {
        self.send(event)
            .map_err(|_| ProctorError::ConnectionClosed(connection_id))
    }
}

/// Non-owning handle to a live connection. The socket itself belongs to
/// the transport task; registries only keep this handle to address it.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sink: Arc<dyn EventSink>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, sink: Arc<dyn EventSink>) -> Self {
        Self { id, sink }
    }

    /// Creates a handle backed by a bounded queue and returns its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(ConnectionId::next(), Arc::new(tx)), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send(&self, event: ServerEvent) -> Result<()> {
        self.sink.deliver(self.id, event)
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("conn-"));
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let (handle, mut rx) = ConnectionHandle::channel(1);
        handle.send(ServerEvent::Pong).unwrap();

        let err = handle.send(ServerEvent::Pong).unwrap_err();
        assert!(matches!(err, ProctorError::QueueFull(id) if id == handle.id()));

        assert!(matches!(rx.recv().await, Some(ServerEvent::Pong)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_queue_reports_disconnect() {
        let (handle, rx) = ConnectionHandle::channel(4);
        drop(rx);

        let err = handle.send(ServerEvent::Pong).unwrap_err();
        assert!(err.is_disconnect());
    }

    #[test]
    fn test_unbounded_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(ConnectionId::from(42), Arc::new(tx));

        for _ in 0..100 {
            handle.send(ServerEvent::Pong).unwrap();
        }
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 100);
    }
}
