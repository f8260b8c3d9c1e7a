use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::auth::Principal;

/// Identity of one transport connection. UUIDv7, so ids sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a teacher sees for one live learner connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub connection_id: ConnectionId,
    pub learner_id: String,
    pub class_id: Option<String>,
    pub display_label: String,
    pub current_shift_ordinal: Option<u32>,
    pub current_step_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl PresenceRecord {
    /// Fresh record for a connection that has not entered a shift yet.
    pub fn new(connection_id: ConnectionId, principal: &Principal, now: DateTime<Utc>) -> Self {
        Self {
            connection_id,
            learner_id: principal.id.clone(),
            class_id: principal.class_id.clone(),
            display_label: principal.display_label.clone(),
            current_shift_ordinal: None,
            current_step_id: None,
            connected_at: now,
            last_activity_at: now,
        }
    }
}

/// A broadcast partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoomId {
    /// Roster of one class; teachers subscribe here.
    Class(String),
    /// Co-presence within a shift, scoped to the class so rooms never mix classes.
    Shift {
        class_id: Option<String>,
        shift_id: String,
    },
}

impl RoomId {
    pub fn class(class_id: impl Into<String>) -> Self {
        RoomId::Class(class_id.into())
    }

    pub fn shift(class_id: Option<&str>, shift_id: impl Into<String>) -> Self {
        RoomId::Shift {
            class_id: class_id.map(str::to_string),
            shift_id: shift_id.into(),
        }
    }

    pub fn is_class(&self) -> bool {
        matches!(self, RoomId::Class(_))
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomId::Class(class_id) => write!(f, "class:{}", class_id),
            RoomId::Shift {
                class_id: Some(class_id),
                shift_id,
            } => write!(f, "shift:{}/{}", class_id, shift_id),
            RoomId::Shift {
                class_id: None,
                shift_id,
            } => write!(f, "shift:-/{}", shift_id),
        }
    }
}
