use thiserror::Error;

use crate::proctoring::ConnectionId;

/// Error types for the proctoring coordinator
#[derive(Debug, Error)]
pub enum ProctorError {
    /// Inbound event errors
    #[error("Invalid event payload for {event}: {reason}")]
    InvalidEvent { event: String, reason: String },

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Session id must not be empty")]
    MissingSessionId,

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Delivery errors
    #[error("Outbound queue full for connection {0}")]
    QueueFull(ConnectionId),

    #[error("Connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigurationParseFailed(String),

    /// Generic errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using ProctorError
pub type Result<T> = std::result::Result<T, ProctorError>;

impl ProctorError {
    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        ProctorError::Internal(msg.into())
    }

    pub fn invalid_event(event: impl Into<String>, reason: impl ToString) -> Self {
        ProctorError::InvalidEvent {
            event: event.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the failure means the peer is gone rather than merely slow
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ProctorError::ConnectionClosed(_))
    }
}
