use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::presence::broadcast::{fan_out, Delta};
use crate::presence::record::{ConnectionId, PresenceRecord};
use crate::presence::registry::Connection;
use crate::proto::ServerEvent;
use crate::ws::ConnectionSender;

/// One broadcast partition. The lock serializes membership changes, record
/// mutations of its members and delta publication.
#[derive(Default)]
pub(crate) struct Room {
    pub(crate) state: Mutex<RoomState>,
}

#[derive(Default)]
pub(crate) struct RoomState {
    /// Connections whose presence belongs to this room.
    pub(crate) members: BTreeMap<ConnectionId, Arc<Connection>>,
    /// Connections receiving this room's deltas.
    pub(crate) subscribers: BTreeMap<ConnectionId, ConnectionSender>,
    /// Set once the room was removed from the index; holders must re-fetch.
    pub(crate) retired: bool,
}

impl RoomState {
    pub(crate) fn is_empty(&self) -> bool {
        self.members.is_empty() && self.subscribers.is_empty()
    }

    pub(crate) fn publish(&self, delta: Delta) {
        if self.subscribers.is_empty() {
            return;
        }
        fan_out(self.subscribers.values(), &ServerEvent::from(delta));
    }

    /// Records of every member, oldest connection first.
    pub(crate) fn snapshot(&self) -> Vec<PresenceRecord> {
        let mut records: Vec<PresenceRecord> = self
            .members
            .values()
            .filter_map(|conn| conn.state.lock().record.clone())
            .collect();
        records.sort_by(|a, b| {
            a.connected_at
                .cmp(&b.connected_at)
                .then_with(|| a.connection_id.cmp(&b.connection_id))
        });
        records
    }
}
