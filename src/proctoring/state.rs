use super::connection::ConnectionId;
use super::messages::MonitoringConfig;
use super::observer::ObserverRegistry;
use super::sampler::MonitoredSet;
use super::session::{Session, SessionRegistry};
use crate::config::ProctoringConfig;

/// The only shared mutable state of the coordinator. Lives behind a single
/// `RwLock`; writers never hold the guard across an `.await`.
#[derive(Debug, Default)]
pub struct ProctoringState {
    pub sessions: SessionRegistry,
    pub monitored: MonitoredSet,
    pub observers: ObserverRegistry,
}

impl ProctoringState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_monitored(&self, session_id: &str) -> bool {
        self.monitored.contains(session_id)
    }

    /// Drops a session and its monitored membership. With `owner` set, only
    /// a session still bound to that connection is removed.
    pub fn remove_session(
        &mut self,
        session_id: &str,
        owner: Option<ConnectionId>,
    ) -> Option<Session> {
        let removed = match owner {
            Some(connection_id) => self.sessions.unregister_owned(session_id, connection_id),
            None => self.sessions.unregister(session_id),
        }?;
        self.monitored.remove(session_id);
        Some(removed)
    }

    pub fn monitoring_config(&self, config: &ProctoringConfig) -> MonitoringConfig {
        MonitoringConfig {
            sample_rate: config.sample_rate,
            frame_rate: config.frame_rate,
            rotation_interval: config.rotation_minutes(),
            total_sessions: self.sessions.len(),
            monitored_count: self.monitored.len(),
        }
    }

    /// Every session's flag agrees with monitored-set membership, and the
    /// set holds no ids without a session.
    pub fn is_consistent(&self) -> bool {
        let flags_agree = self
            .sessions
            .iter()
            .all(|session| session.is_monitored == self.monitored.contains(&session.id));
        let flagged = self.sessions.iter().filter(|s| s.is_monitored).count();
        flags_agree && flagged == self.monitored.len()
    }
}
