use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::connection::{ConnectionHandle, ConnectionId};
use super::messages::{
    InboundFrame, JoinProctoring, MonitoringConfig, ServerEvent, SessionSummary, StudentLeft,
};
use super::relay::{FrameRelay, RelayOutcome, RelayStats};
use super::sampler::Sampler;
use super::scheduler::{RotationOutcome, RotationScheduler, RotationTrigger};
use super::session::{SessionId, SessionMetadata};
use super::state::ProctoringState;
use crate::config::ProctoringConfig;
use crate::error::Result;

/// Point-in-time view of the coordinator, served by the config endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProctoringSnapshot {
    #[serde(flatten)]
    pub config: MonitoringConfig,
    pub min_monitored: usize,
    pub max_monitored: usize,
    pub observer_count: usize,
    pub next_rotation_at: DateTime<Utc>,
    pub rotations: u64,
    pub frames_relayed: u64,
    pub frames_dropped: u64,
}

/// Owns the registries and wires them to the scheduler and relay. One per
/// process, created at startup and shared with every connection.
pub struct ProctoringServer {
    config: ProctoringConfig,
    state: Arc<RwLock<ProctoringState>>,
    scheduler: Arc<RotationScheduler>,
    relay: FrameRelay,
}

impl ProctoringServer {
    pub fn new(config: ProctoringConfig) -> Self {
        let state = Arc::new(RwLock::new(ProctoringState::new()));
        let scheduler = Arc::new(RotationScheduler::new(state.clone(), &config));
        Self::assemble(config, state, scheduler)
    }

    pub fn with_sampler(config: ProctoringConfig, sampler: Sampler) -> Self {
        let state = Arc::new(RwLock::new(ProctoringState::new()));
        let scheduler = Arc::new(RotationScheduler::with_sampler(
            state.clone(),
            &config,
            sampler,
        ));
        Self::assemble(config, state, scheduler)
    }

    fn assemble(
        config: ProctoringConfig,
        state: Arc<RwLock<ProctoringState>>,
        scheduler: Arc<RotationScheduler>,
    ) -> Self {
        Self {
            config,
            state,
            scheduler,
            relay: FrameRelay::new(),
        }
    }

    /// Arms the rotation timer; abort the handle on shutdown.
    pub fn start_rotation(&self) -> JoinHandle<()> {
        self.scheduler.clone().start()
    }

    pub fn config(&self) -> &ProctoringConfig {
        &self.config
    }

    /// Registers (or replaces) an exam-taker session and resamples.
    pub async fn join_session(
        &self,
        connection: &ConnectionHandle,
        join: JoinProctoring,
    ) -> Result<RotationOutcome> {
        let (session_id, metadata) = SessionMetadata::from_join(join);
        {
            let mut state = self.state.write().await;
            state
                .sessions
                .register(session_id.clone(), metadata, connection.clone())?;
            // A replaced session keeps no monitored status until resampled.
            state.monitored.remove(&session_id);
        }

        tracing::info!(
            session_id = %session_id,
            connection_id = %connection.id(),
            "Student joined proctoring"
        );

        let outcome = self.scheduler.trigger(RotationTrigger::Join).await;

        let state = self.state.read().await;
        if let Some(session) = state.sessions.get(&session_id) {
            state
                .observers
                .broadcast(&ServerEvent::StudentJoined(session.summary()));
        }

        Ok(outcome)
    }

    /// Removes a session and resamples if anyone is left. With `owner` set,
    /// a session that has since been taken over by another connection is
    /// left alone. Returns whether a session was removed.
    pub async fn leave_session(
        &self,
        session_id: &str,
        display_name: Option<String>,
        owner: Option<ConnectionId>,
    ) -> bool {
        let remaining = {
            let mut state = self.state.write().await;
            let Some(removed) = state.remove_session(session_id, owner) else {
                tracing::debug!(session_id = %session_id, "Leave for unknown session ignored");
                return false;
            };

            state.observers.broadcast(&ServerEvent::StudentLeft(StudentLeft {
                session_id: removed.id.clone(),
                display_name: display_name.or(Some(removed.metadata.display_name)),
            }));
            state.sessions.len()
        };

        tracing::info!(session_id = %session_id, remaining, "Student left proctoring");

        if remaining > 0 {
            self.scheduler.trigger(RotationTrigger::Leave).await;
        }
        true
    }

    /// Subscribes an observer and catches it up with the current sessions
    /// and configuration.
    pub async fn join_observer(&self, connection: &ConnectionHandle) -> Result<()> {
        let mut state = self.state.write().await;
        state.observers.join(connection.clone());

        let sessions = state.sessions.summaries();
        let config = state.monitoring_config(&self.config);
        tracing::info!(
            connection_id = %connection.id(),
            total_sessions = config.total_sessions,
            "Observer joined monitoring room"
        );

        connection.send(ServerEvent::ActiveSessions(sessions))?;
        connection.send(ServerEvent::MonitoringConfig(config))?;
        Ok(())
    }

    pub async fn leave_observer(&self, connection_id: ConnectionId) -> bool {
        let left = self.state.write().await.observers.leave(connection_id);
        if left {
            tracing::info!(connection_id = %connection_id, "Observer left monitoring room");
        }
        left
    }

    pub async fn is_observer(&self, connection_id: ConnectionId) -> bool {
        self.state.read().await.observers.contains(connection_id)
    }

    pub async fn refresh(&self) -> RotationOutcome {
        self.scheduler.trigger(RotationTrigger::Refresh).await
    }

    /// Relays a frame sent by `sender`. Ownership and membership are checked
    /// under one read guard.
    pub async fn relay_frame(&self, sender: ConnectionId, frame: InboundFrame) -> RelayOutcome {
        let state = self.state.read().await;
        self.relay.relay_frame(&state, sender, frame)
    }

    /// Timer entry point, exposed for callers that drive rotation themselves.
    pub async fn rotate(&self) -> RotationOutcome {
        self.scheduler.on_tick().await
    }

    pub async fn session(&self, session_id: &str) -> Option<SessionSummary> {
        self.state
            .read()
            .await
            .sessions
            .get(session_id)
            .map(|session| session.summary())
    }

    pub async fn sessions(&self) -> Vec<SessionSummary> {
        self.state.read().await.sessions.summaries()
    }

    pub async fn monitored_ids(&self) -> Vec<SessionId> {
        self.state.read().await.monitored.sorted_ids()
    }

    pub async fn snapshot(&self) -> ProctoringSnapshot {
        let state = self.state.read().await;
        let RelayStats {
            frames_relayed,
            frames_dropped,
            ..
        } = self.relay.stats();

        ProctoringSnapshot {
            config: state.monitoring_config(&self.config),
            min_monitored: self.config.min_monitored,
            max_monitored: self.config.max_monitored,
            observer_count: state.observers.len(),
            next_rotation_at: self.scheduler.next_rotation_at(),
            rotations: self.scheduler.rotations(),
            frames_relayed,
            frames_dropped,
        }
    }

    pub fn relay_stats(&self) -> RelayStats {
        self.relay.stats()
    }

    pub fn rotations(&self) -> u64 {
        self.scheduler.rotations()
    }

    #[cfg(test)]
    pub(crate) async fn is_consistent(&self) -> bool {
        self.state.read().await.is_consistent()
    }
}
