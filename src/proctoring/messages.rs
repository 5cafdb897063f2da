//! Wire vocabulary of the proctoring socket.
//!
//! Every text frame is a JSON envelope `{"event": "<name>", "data": <payload>}`.
//! Payload field names are camelCase; `data` may be omitted for events that
//! carry nothing (`ping`, `join-monitoring`, `refresh-monitoring`, `pong`).

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::session::SessionId;
use crate::error::{ProctorError, Result};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinProctoring {
    pub session_id: SessionId,
    pub display_name: String,
    /// Opaque; echoed back to observers exactly as received
    pub test_id: Value,
    #[serde(default)]
    pub test_title: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveProctoring {
    pub session_id: SessionId,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// A webcam frame as sent by an exam-taker. Any metadata the client repeats
/// alongside the frame is ignored in favour of the registered session's.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    pub session_id: SessionId,
    #[serde(alias = "frame")]
    pub frame_blob: String,
    /// Client capture time, epoch milliseconds
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    JoinProctoring(JoinProctoring),
    LeaveProctoring(LeaveProctoring),
    Frame(InboundFrame),
    Ping,
    JoinMonitoring,
    RefreshMonitoring,
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ClientEvent {
    pub fn parse(text: &str) -> Result<Self> {
        let Envelope { event, data } = serde_json::from_str(text)
            .map_err(|e| ProctorError::MalformedMessage(e.to_string()))?;

        // The prefixed names are what the browser clients historically emit.
        match event.as_str() {
            "join-proctoring" | "student:join-proctoring" => {
                payload(&event, data).map(ClientEvent::JoinProctoring)
            }
            "leave-proctoring" | "student:leave-proctoring" => {
                payload(&event, data).map(ClientEvent::LeaveProctoring)
            }
            "frame" | "proctoring:frame" => payload(&event, data).map(ClientEvent::Frame),
            "ping" => Ok(ClientEvent::Ping),
            "join-monitoring" | "admin:join-monitoring" => Ok(ClientEvent::JoinMonitoring),
            "refresh-monitoring" | "admin:refresh-monitoring" => {
                Ok(ClientEvent::RefreshMonitoring)
            }
            _ => Err(ProctorError::UnknownEvent(event)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinProctoring(_) => "join-proctoring",
            ClientEvent::LeaveProctoring(_) => "leave-proctoring",
            ClientEvent::Frame(_) => "frame",
            ClientEvent::Ping => "ping",
            ClientEvent::JoinMonitoring => "join-monitoring",
            ClientEvent::RefreshMonitoring => "refresh-monitoring",
        }
    }
}

fn payload<T: DeserializeOwned>(event: &str, data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(|e| ProctorError::invalid_event(event, e))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringStatus {
    pub is_monitored: bool,
    pub frame_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub display_name: String,
    pub test_id: Value,
    pub test_title: String,
    pub joined_at: DateTime<Utc>,
    pub is_monitored: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringConfig {
    pub sample_rate: f64,
    pub frame_rate: u32,
    /// Minutes
    pub rotation_interval: u64,
    pub total_sessions: usize,
    pub monitored_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentLeft {
    pub session_id: SessionId,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSummary {
    pub total_sessions: usize,
    pub monitored_count: usize,
    pub monitored_ids: Vec<SessionId>,
    pub sample_rate: f64,
    pub next_rotation_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedFrame {
    pub session_id: SessionId,
    pub display_name: String,
    pub test_id: Value,
    pub test_title: String,
    pub frame_blob: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "monitoring-status")]
    MonitoringStatus(MonitoringStatus),

    #[serde(rename = "active-sessions")]
    ActiveSessions(Vec<SessionSummary>),

    #[serde(rename = "monitoring-config")]
    MonitoringConfig(MonitoringConfig),

    #[serde(rename = "student:joined")]
    StudentJoined(SessionSummary),

    #[serde(rename = "student:left")]
    StudentLeft(StudentLeft),

    #[serde(rename = "monitoring-pool-updated")]
    PoolUpdated(PoolSummary),

    /// Shared between every observer the frame fans out to
    #[serde(rename = "frame")]
    Frame(Arc<RelayedFrame>),

    #[serde(rename = "pong")]
    Pong,
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::MonitoringStatus(_) => "monitoring-status",
            ServerEvent::ActiveSessions(_) => "active-sessions",
            ServerEvent::MonitoringConfig(_) => "monitoring-config",
            ServerEvent::StudentJoined(_) => "student:joined",
            ServerEvent::StudentLeft(_) => "student:left",
            ServerEvent::PoolUpdated(_) => "monitoring-pool-updated",
            ServerEvent::Frame(_) => "frame",
            ServerEvent::Pong => "pong",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
