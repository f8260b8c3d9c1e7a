//! Wire contract for the `/ws` channel.
//!
//! Every frame is a JSON text message `{"event": <name>, "data": <payload>}`.

use serde::{Deserialize, Serialize};

use crate::gate::GatePosition;
use crate::presence::record::{ConnectionId, PresenceRecord};

/// Events accepted from clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "join:week")]
    JoinWeek(String),
    #[serde(rename = "leave:week")]
    LeaveWeek(String),
    #[serde(rename = "student:enter-shift")]
    EnterShift(u32),
    #[serde(rename = "student:change-step")]
    ChangeStep(String),
    #[serde(rename = "student:clock-out")]
    ClockOut(u32),
    #[serde(rename = "teacher:subscribe")]
    Subscribe,
    #[serde(rename = "teacher:unsubscribe")]
    Unsubscribe,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinWeek(_) => "join:week",
            ClientEvent::LeaveWeek(_) => "leave:week",
            ClientEvent::EnterShift(_) => "student:enter-shift",
            ClientEvent::ChangeStep(_) => "student:change-step",
            ClientEvent::ClockOut(_) => "student:clock-out",
            ClientEvent::Subscribe => "teacher:subscribe",
            ClientEvent::Unsubscribe => "teacher:unsubscribe",
        }
    }
}

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "teacher:class-snapshot")]
    ClassSnapshot(Vec<PresenceRecord>),
    #[serde(rename = "student:connected")]
    StudentConnected(PresenceRecord),
    #[serde(rename = "student:status-updated")]
    StudentStatusUpdated(PresenceRecord),
    #[serde(rename = "student:disconnected")]
    StudentDisconnected(Departure),
    #[serde(rename = "student:gate")]
    Gate(GatePosition),
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Departure {
    pub user_id: String,
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    /// Name of the client event that was rejected, if it could be decoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}
