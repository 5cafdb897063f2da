use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

use super::connection::{ConnectionHandle, ConnectionId};
use super::messages::{JoinProctoring, SessionSummary};
use crate::error::{ProctorError, Result};

/// Client-supplied identity of an exam-taker.
pub type SessionId = String;

/// Test context carried by a session; passed through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMetadata {
    pub display_name: String,
    pub test_id: Value,
    pub test_title: String,
}

impl SessionMetadata {
    /// Splits a join request into the session id and its metadata.
    pub fn from_join(join: JoinProctoring) -> (SessionId, Self) {
        (
            join.session_id,
            Self {
                display_name: join.display_name,
                test_id: join.test_id,
                test_title: join.test_title,
            },
        )
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub metadata: SessionMetadata,
    pub connection: ConnectionHandle,
    pub joined_at: DateTime<Utc>,
    pub is_monitored: bool,
}

impl Session {
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            display_name: self.metadata.display_name.clone(),
            test_id: self.metadata.test_id.clone(),
            test_title: self.metadata.test_title.clone(),
            joined_at: self.joined_at,
            is_monitored: self.is_monitored,
        }
    }
}

/// Live exam-taker sessions keyed by session id. In-memory only.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a session, replacing any earlier one with the same id.
    /// Returns the replaced session.
    pub fn register(
        &mut self,
        session_id: SessionId,
        metadata: SessionMetadata,
        connection: ConnectionHandle,
    ) -> Result<Option<Session>> {
        if session_id.trim().is_empty() {
            return Err(ProctorError::MissingSessionId);
        }

        let session = Session {
            id: session_id.clone(),
            metadata,
            connection,
            joined_at: Utc::now(),
            is_monitored: false,
        };

        let replaced = self.sessions.insert(session_id, session);
        if let Some(previous) = &replaced {
            tracing::info!(
                session_id = %previous.id,
                previous_connection = %previous.connection.id(),
                "Session replaced by a later join"
            );
        }
        Ok(replaced)
    }

    pub fn unregister(&mut self, session_id: &str) -> Option<Session> {
        self.sessions.remove(session_id)
    }

    /// Removes the session only if it still belongs to `connection_id`.
    pub fn unregister_owned(
        &mut self,
        session_id: &str,
        connection_id: ConnectionId,
    ) -> Option<Session> {
        match self.sessions.get(session_id) {
            Some(session) if session.connection.id() == connection_id => {
                self.sessions.remove(session_id)
            }
            _ => None,
        }
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    /// Fresh snapshot of every session; later mutations do not affect it.
    pub fn all(&self) -> Vec<Session> {
        self.sessions.values().cloned().collect()
    }

    /// Wire view of `all()`, oldest join first.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self.all().iter().map(Session::summary).collect();
        summaries.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        summaries
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().cloned().collect()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
