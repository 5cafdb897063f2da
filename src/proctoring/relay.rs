use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::connection::ConnectionId;
use super::messages::{InboundFrame, RelayedFrame, ServerEvent};
use super::observer::BroadcastReport;
use super::state::ProctoringState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Relayed(BroadcastReport),
    /// Registered, but not in this epoch's sample
    NotMonitored,
    /// The session now belongs to a different connection
    NotOwner,
    UnknownSession,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub frames_relayed: u64,
    pub frames_dropped: u64,
    pub deliveries_skipped: u64,
}

/// Forwards frames from monitored sessions to every observer and discards
/// the rest. Reads state only; the counters are its sole mutable data.
#[derive(Debug, Default)]
pub struct FrameRelay {
    frames_relayed: AtomicU64,
    frames_dropped: AtomicU64,
    deliveries_skipped: AtomicU64,
}

impl FrameRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relays `frame` if `sender` still owns the session and the session is
    /// in the monitored set.
    pub fn relay_frame(
        &self,
        state: &ProctoringState,
        sender: ConnectionId,
        frame: InboundFrame,
    ) -> RelayOutcome {
        let Some(session) = state.sessions.get(&frame.session_id) else {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return RelayOutcome::UnknownSession;
        };

        if session.connection.id() != sender {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return RelayOutcome::NotOwner;
        }

        if !state.is_monitored(&frame.session_id) {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return RelayOutcome::NotMonitored;
        }

        let event = ServerEvent::Frame(Arc::new(RelayedFrame {
            session_id: frame.session_id,
            display_name: session.metadata.display_name.clone(),
            test_id: session.metadata.test_id.clone(),
            test_title: session.metadata.test_title.clone(),
            frame_blob: frame.frame_blob,
            timestamp: frame.timestamp,
        }));

        let report = state.observers.broadcast(&event);
        self.frames_relayed.fetch_add(1, Ordering::Relaxed);
        self.deliveries_skipped.fetch_add(
            (report.dropped + report.closed.len()) as u64,
            Ordering::Relaxed,
        );
        RelayOutcome::Relayed(report)
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            frames_relayed: self.frames_relayed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            deliveries_skipped: self.deliveries_skipped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proctoring::connection::ConnectionHandle;
    use crate::proctoring::session::SessionMetadata;
    use serde_json::json;

    fn frame(session_id: &str) -> InboundFrame {
        InboundFrame {
            session_id: session_id.to_string(),
            frame_blob: "data:image/jpeg;base64,/9j/".to_string(),
            timestamp: 1_700_000_000_000,
        }
    }

    fn state_with(ids: &[&str], monitored: &[&str]) -> (ProctoringState, ConnectionHandle) {
        let mut state = ProctoringState::new();
        let (student, _rx) = ConnectionHandle::channel(4);
        for id in ids {
            state
                .sessions
                .register(
                    id.to_string(),
                    SessionMetadata {
                        display_name: format!("Student {}", id),
                        test_id: json!(99),
                        test_title: "Chemistry".to_string(),
                    },
                    student.clone(),
                )
                .unwrap();
        }
        state
            .monitored
            .replace(monitored.iter().map(|s| s.to_string()).collect());
        (state, student)
    }

    #[tokio::test]
    async fn test_monitored_frame_reaches_all_observers() {
        let (mut state, student) = state_with(&["S1"], &["S1"]);
        let (a, mut rx_a) = ConnectionHandle::channel(4);
        let (b, mut rx_b) = ConnectionHandle::channel(4);
        state.observers.join(a);
        state.observers.join(b);

        let relay = FrameRelay::new();
        let outcome = relay.relay_frame(&state, student.id(), frame("S1"));
        assert!(matches!(outcome, RelayOutcome::Relayed(ref r) if r.delivered == 2));

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.recv().await {
                Some(ServerEvent::Frame(relayed)) => {
                    assert_eq!(relayed.session_id, "S1");
                    assert_eq!(relayed.display_name, "Student S1");
                    assert_eq!(relayed.test_id, json!(99));
                    assert_eq!(relayed.test_title, "Chemistry");
                    assert_eq!(relayed.timestamp, 1_700_000_000_000);
                }
                other => panic!("expected frame, got {:?}", other),
            }
        }
        assert_eq!(relay.stats().frames_relayed, 1);
    }

    #[tokio::test]
    async fn test_unmonitored_frame_is_dropped() {
        let (mut state, student) = state_with(&["S1", "S2"], &["S1"]);
        let (observer, mut rx) = ConnectionHandle::channel(4);
        state.observers.join(observer);

        let relay = FrameRelay::new();
        assert_eq!(
            relay.relay_frame(&state, student.id(), frame("S2")),
            RelayOutcome::NotMonitored
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(relay.stats().frames_dropped, 1);
        assert_eq!(relay.stats().frames_relayed, 0);
    }

    #[tokio::test]
    async fn test_unknown_session_frame_is_dropped() {
        let (mut state, student) = state_with(&["S1"], &["S1"]);
        let (observer, mut rx) = ConnectionHandle::channel(4);
        state.observers.join(observer);

        let relay = FrameRelay::new();
        assert_eq!(
            relay.relay_frame(&state, student.id(), frame("nobody")),
            RelayOutcome::UnknownSession
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_relay_does_not_touch_state() {
        let (state, student) = state_with(&["S1", "S2"], &["S1"]);
        let relay = FrameRelay::new();

        relay.relay_frame(&state, student.id(), frame("S1"));
        relay.relay_frame(&state, student.id(), frame("S2"));

        assert_eq!(state.sessions.len(), 2);
        assert_eq!(state.monitored.sorted_ids(), vec!["S1".to_string()]);
    }

    #[tokio::test]
    async fn test_slow_observer_skipped_without_blocking_others() {
        let (mut state, student) = state_with(&["S1"], &["S1"]);
        let (slow, _slow_rx) = ConnectionHandle::channel(1);
        let (fast, mut fast_rx) = ConnectionHandle::channel(8);
        state.observers.join(slow);
        state.observers.join(fast);

        let relay = FrameRelay::new();
        for _ in 0..3 {
            relay.relay_frame(&state, student.id(), frame("S1"));
        }

        let mut received = 0;
        while fast_rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 3);
        assert_eq!(relay.stats().deliveries_skipped, 2);
    }

    #[tokio::test]
    async fn test_frame_from_replaced_connection_is_dropped() {
        let (mut state, old) = state_with(&["S1"], &["S1"]);
        let (new, _new_rx) = ConnectionHandle::channel(4);
        state
            .sessions
            .register(
                "S1".to_string(),
                SessionMetadata {
                    display_name: "Student S1".to_string(),
                    test_id: json!(99),
                    test_title: "Chemistry".to_string(),
                },
                new.clone(),
            )
            .unwrap();
        let (observer, mut rx) = ConnectionHandle::channel(4);
        state.observers.join(observer);

        let relay = FrameRelay::new();
        assert_eq!(
            relay.relay_frame(&state, old.id(), frame("S1")),
            RelayOutcome::NotOwner
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(relay.stats().frames_dropped, 1);

        assert!(matches!(
            relay.relay_frame(&state, new.id(), frame("S1")),
            RelayOutcome::Relayed(_)
        ));
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::Frame(_))));
    }
}
