//! Room broadcaster: encodes server events once and fans them out.
//!
//! Callers publish while holding the owning room's lock, so every
//! subscriber of a room sees deltas in the same order and a snapshot can
//! never interleave with a delta.

use axum::extract::ws::Message;

use crate::presence::record::{ConnectionId, PresenceRecord};
use crate::proto::{Departure, ServerEvent};
use crate::ws::ConnectionSender;

/// The three incremental changes a room subscriber can observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    Connected(PresenceRecord),
    Updated(PresenceRecord),
    Disconnected {
        user_id: String,
        connection_id: ConnectionId,
    },
}

impl From<Delta> for ServerEvent {
    fn from(delta: Delta) -> Self {
        match delta {
            Delta::Connected(record) => ServerEvent::StudentConnected(record),
            Delta::Updated(record) => ServerEvent::StudentStatusUpdated(record),
            Delta::Disconnected {
                user_id,
                connection_id,
            } => ServerEvent::StudentDisconnected(Departure {
                user_id,
                connection_id,
            }),
        }
    }
}

/// Encode a server event as a text frame.
pub fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server event");
            None
        }
    }
}

/// Send one event to one connection. A closed receiver is ignored; the
/// connection's own actor cleans up.
pub fn send_event(sender: &ConnectionSender, event: &ServerEvent) {
    if let Some(msg) = encode(event) {
        let _ = sender.send(msg);
    }
}

/// Encode once, send to every subscriber.
pub fn fan_out<'a>(subscribers: impl IntoIterator<Item = &'a ConnectionSender>, event: &ServerEvent) {
    let Some(msg) = encode(event) else {
        return;
    };
    for sender in subscribers {
        let _ = sender.send(msg.clone());
    }
}
