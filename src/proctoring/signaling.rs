use std::sync::Arc;

use super::connection::ConnectionHandle;
use super::messages::{ClientEvent, InboundFrame, JoinProctoring, LeaveProctoring, ServerEvent};
use super::relay::RelayOutcome;
use super::server::ProctoringServer;
use super::session::SessionId;

/// What a connection has identified itself as. A connection is never both
/// an exam-taker and an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionRole {
    Unauthenticated,
    ExamTaker { session_id: SessionId },
    Observer,
}

/// Maps one connection's inbound events onto the coordinator. Events are
/// handled one at a time, in arrival order.
pub struct ProctoringSignalingHandler {
    server: Arc<ProctoringServer>,
    connection: ConnectionHandle,
    role: ConnectionRole,
}

impl ProctoringSignalingHandler {
    pub fn new(server: Arc<ProctoringServer>, connection: ConnectionHandle) -> Self {
        Self {
            server,
            connection,
            role: ConnectionRole::Unauthenticated,
        }
    }

    pub fn role(&self) -> &ConnectionRole {
        &self.role
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Parses and dispatches a text frame. Bad input is logged and dropped.
    pub async fn handle_text(&mut self, text: &str) {
        match ClientEvent::parse(text) {
            Ok(event) => self.handle_message(event).await,
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.connection.id(),
                    error = %e,
                    "Dropping malformed proctoring message"
                );
            }
        }
    }

    pub async fn handle_message(&mut self, event: ClientEvent) {
        tracing::debug!(
            connection_id = %self.connection.id(),
            event = event.name(),
            "Received proctoring event"
        );

        match event {
            ClientEvent::JoinProctoring(join) => self.on_join_proctoring(join).await,
            ClientEvent::LeaveProctoring(leave) => self.on_leave_proctoring(leave).await,
            ClientEvent::Frame(frame) => self.on_frame(frame).await,
            ClientEvent::Ping => {
                if let Err(e) = self.connection.send(ServerEvent::Pong) {
                    tracing::debug!(connection_id = %self.connection.id(), error = %e, "Pong not delivered");
                }
            }
            ClientEvent::JoinMonitoring => self.on_join_monitoring().await,
            ClientEvent::RefreshMonitoring => self.on_refresh_monitoring().await,
        }
    }

    async fn on_join_proctoring(&mut self, join: JoinProctoring) {
        match &self.role {
            ConnectionRole::Observer => {
                tracing::warn!(
                    connection_id = %self.connection.id(),
                    "Observer connection tried to join as exam-taker, ignoring"
                );
                return;
            }
            ConnectionRole::ExamTaker { session_id } if *session_id != join.session_id => {
                let previous = session_id.clone();
                tracing::info!(
                    connection_id = %self.connection.id(),
                    previous_session = %previous,
                    next_session = %join.session_id,
                    "Connection switching sessions"
                );
                self.server
                    .leave_session(&previous, None, Some(self.connection.id()))
                    .await;
                self.role = ConnectionRole::Unauthenticated;
            }
            _ => {}
        }

        let session_id = join.session_id.clone();
        match self.server.join_session(&self.connection, join).await {
            Ok(_) => self.role = ConnectionRole::ExamTaker { session_id },
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.connection.id(),
                    error = %e,
                    "Rejected join-proctoring"
                );
            }
        }
    }

    async fn on_leave_proctoring(&mut self, leave: LeaveProctoring) {
        match &self.role {
            ConnectionRole::ExamTaker { session_id } if *session_id == leave.session_id => {
                self.server
                    .leave_session(
                        &leave.session_id,
                        leave.display_name,
                        Some(self.connection.id()),
                    )
                    .await;
                self.role = ConnectionRole::Unauthenticated;
            }
            _ => {
                tracing::debug!(
                    connection_id = %self.connection.id(),
                    session_id = %leave.session_id,
                    "Leave for a session this connection does not own, ignoring"
                );
            }
        }
    }

    async fn on_frame(&mut self, frame: InboundFrame) {
        let owns_session = matches!(
            &self.role,
            ConnectionRole::ExamTaker { session_id } if *session_id == frame.session_id
        );
        if !owns_session {
            tracing::debug!(
                connection_id = %self.connection.id(),
                session_id = %frame.session_id,
                "Frame from a connection not bound to that session, dropping"
            );
            return;
        }

        let session_id = frame.session_id.clone();
        match self.server.relay_frame(self.connection.id(), frame).await {
            RelayOutcome::Relayed(report) => {
                tracing::trace!(
                    session_id = %session_id,
                    delivered = report.delivered,
                    dropped = report.dropped,
                    "Frame relayed"
                );
            }
            outcome => {
                tracing::trace!(session_id = %session_id, outcome = ?outcome, "Frame dropped");
            }
        }
    }

    async fn on_join_monitoring(&mut self) {
        if let ConnectionRole::ExamTaker { session_id } = &self.role {
            tracing::warn!(
                connection_id = %self.connection.id(),
                session_id = %session_id,
                "Exam-taker connection tried to join monitoring, ignoring"
            );
            return;
        }

        match self.server.join_observer(&self.connection).await {
            Ok(()) => self.role = ConnectionRole::Observer,
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.connection.id(),
                    error = %e,
                    "Observer catch-up could not be delivered"
                );
                self.role = ConnectionRole::Observer;
            }
        }
    }

    async fn on_refresh_monitoring(&mut self) {
        if self.role != ConnectionRole::Observer {
            tracing::debug!(
                connection_id = %self.connection.id(),
                "Refresh from a non-observer connection, ignoring"
            );
            return;
        }

        tracing::info!(
            connection_id = %self.connection.id(),
            "Observer requested monitoring pool refresh"
        );
        self.server.refresh().await;
    }

    /// Releases whatever the connection held. Called once the transport is gone.
    pub async fn cleanup(&mut self) {
        match std::mem::replace(&mut self.role, ConnectionRole::Unauthenticated) {
            ConnectionRole::ExamTaker { session_id } => {
                tracing::info!(
                    connection_id = %self.connection.id(),
                    session_id = %session_id,
                    "Exam-taker disconnected"
                );
                self.server
                    .leave_session(&session_id, None, Some(self.connection.id()))
                    .await;
            }
            ConnectionRole::Observer => {
                self.server.leave_observer(self.connection.id()).await;
            }
            ConnectionRole::Unauthenticated => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProctoringConfig;
    use crate::proctoring::sampler::{Sampler, SamplingPolicy};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn server() -> Arc<ProctoringServer> {
        let config = ProctoringConfig::default();
        let sampler = Sampler::with_seed(SamplingPolicy::from(&config), 5);
        Arc::new(ProctoringServer::with_sampler(config, sampler))
    }

    fn handler(server: &Arc<ProctoringServer>) -> (ProctoringSignalingHandler, mpsc::Receiver<ServerEvent>) {
        let (handle, rx) = ConnectionHandle::channel(64);
        (ProctoringSignalingHandler::new(server.clone(), handle), rx)
    }

    fn join_text(id: &str) -> String {
        json!({
            "event": "join-proctoring",
            "data": {"sessionId": id, "displayName": format!("Student {}", id), "testId": 1, "testTitle": "Art"}
        })
        .to_string()
    }

    fn frame_text(id: &str) -> String {
        json!({
            "event": "frame",
            "data": {"sessionId": id, "frameBlob": "blob", "timestamp": 1}
        })
        .to_string()
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_join_sets_exam_taker_role_and_status() {
        let server = server();
        let (mut student, mut rx) = handler(&server);

        student.handle_text(&join_text("S1")).await;

        assert_eq!(
            student.role(),
            &ConnectionRole::ExamTaker { session_id: "S1".to_string() }
        );
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::MonitoringStatus(status) if status.is_monitored && status.frame_rate == 2
        )));
    }

    #[tokio::test]
    async fn test_ping_gets_pong() {
        let server = server();
        let (mut conn, mut rx) = handler(&server);

        conn.handle_text(r#"{"event":"ping"}"#).await;
        assert_eq!(drain(&mut rx), vec![ServerEvent::Pong]);
    }

    #[tokio::test]
    async fn test_malformed_message_is_dropped() {
        let server = server();
        let (mut conn, mut rx) = handler(&server);

        conn.handle_text("{not json").await;
        conn.handle_text(r#"{"event":"join-proctoring","data":{"displayName":"x"}}"#).await;
        conn.handle_text(r#"{"event":"teleport"}"#).await;

        assert_eq!(conn.role(), &ConnectionRole::Unauthenticated);
        assert!(drain(&mut rx).is_empty());
        assert!(server.sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_before_join_monitoring_is_ignored() {
        let server = server();
        let (mut student, _srx) = handler(&server);
        student.handle_text(&join_text("S1")).await;
        let rotations = server.rotations();

        let (mut admin, mut rx) = handler(&server);
        admin.handle_text(r#"{"event":"refresh-monitoring"}"#).await;
        assert_eq!(server.rotations(), rotations);
        assert!(drain(&mut rx).is_empty());

        admin.handle_text(r#"{"event":"join-monitoring"}"#).await;
        admin.handle_text(r#"{"event":"refresh-monitoring"}"#).await;
        assert_eq!(server.rotations(), rotations + 1);
        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(ServerEvent::PoolUpdated(_))));
    }

    #[tokio::test]
    async fn test_roles_are_exclusive() {
        let server = server();

        let (mut student, _srx) = handler(&server);
        student.handle_text(&join_text("S1")).await;
        student.handle_text(r#"{"event":"join-monitoring"}"#).await;
        assert_eq!(
            student.role(),
            &ConnectionRole::ExamTaker { session_id: "S1".to_string() }
        );
        assert!(!server.is_observer(student.connection().id()).await);

        let (mut admin, _arx) = handler(&server);
        admin.handle_text(r#"{"event":"join-monitoring"}"#).await;
        admin.handle_text(&join_text("S2")).await;
        assert_eq!(admin.role(), &ConnectionRole::Observer);
        assert!(server.session("S2").await.is_none());
    }

    #[tokio::test]
    async fn test_frames_relayed_only_from_owning_connection() {
        let server = server();
        let (mut student, _srx) = handler(&server);
        let (mut impostor, _irx) = handler(&server);
        let (mut admin, mut arx) = handler(&server);

        student.handle_text(&join_text("S1")).await;
        admin.handle_text(r#"{"event":"join-monitoring"}"#).await;
        drain(&mut arx);

        impostor.handle_text(&frame_text("S1")).await;
        assert!(drain(&mut arx).is_empty());

        student.handle_text(&frame_text("S1")).await;
        let events = drain(&mut arx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ServerEvent::Frame(f) if f.session_id == "S1"));
    }

    #[tokio::test]
    async fn test_disconnect_unregisters_session() {
        let server = server();
        let (mut student, _srx) = handler(&server);
        let (mut admin, mut arx) = handler(&server);
        admin.handle_text(r#"{"event":"join-monitoring"}"#).await;
        student.handle_text(&join_text("S1")).await;
        drain(&mut arx);

        student.cleanup().await;

        assert!(server.session("S1").await.is_none());
        assert_eq!(student.role(), &ConnectionRole::Unauthenticated);
        let events = drain(&mut arx);
        assert!(matches!(&events[0], ServerEvent::StudentLeft(left) if left.session_id == "S1"));
    }

    #[tokio::test]
    async fn test_disconnect_of_replaced_connection_keeps_new_session() {
        let server = server();
        let (mut old, _orx) = handler(&server);
        let (mut new, _nrx) = handler(&server);

        old.handle_text(&join_text("S1")).await;
        new.handle_text(&join_text("S1")).await;
        old.cleanup().await;

        assert!(server.session("S1").await.is_some());
        new.cleanup().await;
        assert!(server.session("S1").await.is_none());
    }

    #[tokio::test]
    async fn test_replaced_connection_cannot_stream_for_session() {
        let server = server();
        let (mut old, _orx) = handler(&server);
        let (mut new, _nrx) = handler(&server);
        let (mut admin, mut arx) = handler(&server);

        old.handle_text(&join_text("S1")).await;
        new.handle_text(&join_text("S1")).await;
        admin.handle_text(r#"{"event":"join-monitoring"}"#).await;
        drain(&mut arx);

        old.handle_text(&frame_text("S1")).await;
        assert!(drain(&mut arx).is_empty());
        assert_eq!(server.relay_stats().frames_relayed, 0);
        assert_eq!(server.relay_stats().frames_dropped, 1);

        new.handle_text(&frame_text("S1")).await;
        let events = drain(&mut arx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ServerEvent::Frame(f) if f.session_id == "S1"));
    }

    #[tokio::test]
    async fn test_observer_disconnect_leaves_room() {
        let server = server();
        let (mut admin, _arx) = handler(&server);
        admin.handle_text(r#"{"event":"join-monitoring"}"#).await;
        assert!(server.is_observer(admin.connection().id()).await);

        admin.cleanup().await;
        assert!(!server.is_observer(admin.connection().id()).await);
    }

    #[tokio::test]
    async fn test_explicit_leave() {
        let server = server();
        let (mut student, _srx) = handler(&server);
        student.handle_text(&join_text("S1")).await;

        student
            .handle_text(r#"{"event":"leave-proctoring","data":{"sessionId":"other"}}"#)
            .await;
        assert!(server.session("S1").await.is_some());

        student
            .handle_text(r#"{"event":"leave-proctoring","data":{"sessionId":"S1","displayName":"Student S1"}}"#)
            .await;
        assert!(server.session("S1").await.is_none());
        assert_eq!(student.role(), &ConnectionRole::Unauthenticated);
    }

    #[tokio::test]
    async fn test_switching_sessions_releases_previous() {
        let server = server();
        let (mut student, _srx) = handler(&server);

        student.handle_text(&join_text("S1")).await;
        student.handle_text(&join_text("S2")).await;

        assert!(server.session("S1").await.is_none());
        assert!(server.session("S2").await.is_some());
        assert_eq!(
            student.role(),
            &ConnectionRole::ExamTaker { session_id: "S2".to_string() }
        );
    }
}
