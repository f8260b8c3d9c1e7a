//! Presence registry: the only owner of live connection state.
//!
//! Connections are indexed by id; rooms hold their members and
//! subscribers behind a per-room lock. Lock order is always
//! room → connection, never the reverse, and no lock is held across an
//! await point (every operation here is synchronous).
//!
//! Operations on an unknown or already-closed connection are logged no-ops
//! so a message racing a disconnect can never take down the caller.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::auth::Principal;
use crate::gate::Shift;
use crate::presence::broadcast::{send_event, Delta};
use crate::presence::record::{ConnectionId, PresenceRecord, RoomId};
use crate::presence::room::{Room, RoomState};
use crate::proto::ServerEvent;
use crate::ws::ConnectionSender;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresenceError {
    #[error("no shift has been entered on this connection")]
    NoActiveShift,
    #[error("step {step_id} is not part of shift {ordinal}")]
    StepNotInShift { step_id: String, ordinal: u32 },
    #[error("connection does not carry learner presence")]
    NotALearner,
    #[error("only teachers bound to a class can subscribe to it")]
    NotATeacher,
}

pub(crate) struct Connection {
    pub(crate) id: ConnectionId,
    pub(crate) principal: Principal,
    pub(crate) sender: ConnectionSender,
    pub(crate) state: Mutex<ConnectionState>,
}

pub(crate) struct ConnectionState {
    /// Set exactly once, by the first disconnect.
    pub(crate) closed: bool,
    pub(crate) rooms: BTreeSet<RoomId>,
    /// Learners only.
    pub(crate) record: Option<PresenceRecord>,
    /// Shift entered on this connection, kept for step validation.
    pub(crate) shift: Option<Shift>,
}

impl Connection {
    /// The class roster room a learner connection belongs to for its whole life.
    fn roster_room(&self) -> Option<RoomId> {
        if !self.principal.is_learner() {
            return None;
        }
        self.principal.class_id.clone().map(RoomId::Class)
    }
}

#[derive(Default)]
pub struct PresenceRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    rooms: DashMap<RoomId, Arc<Room>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    /// Run `f` on a room under its lock, creating the room on demand and
    /// dropping it from the index once it has neither members nor subscribers.
    fn with_room<R>(&self, room_id: &RoomId, f: impl FnOnce(&mut RoomState) -> R) -> R {
        let mut f = Some(f);
        loop {
            let room = self.rooms.entry(room_id.clone()).or_default().value().clone();
            let mut state = room.state.lock();
            if state.retired {
                continue;
            }
            let out = match f.take() {
                Some(f) => f(&mut *state),
                None => unreachable!("room closure runs once"),
            };
            if state.is_empty() {
                state.retired = true;
                self.rooms
                    .remove_if(room_id, |_, current| Arc::ptr_eq(current, &room));
            }
            return out;
        }
    }

    /// Register a new connection. Learners with a class appear on their class
    /// roster immediately; no other room is joined.
    pub fn connect(&self, principal: Principal, sender: ConnectionSender) -> ConnectionId {
        let id = ConnectionId::new();
        let record = principal
            .is_learner()
            .then(|| PresenceRecord::new(id, &principal, Utc::now()));
        let conn = Arc::new(Connection {
            id,
            principal,
            sender,
            state: Mutex::new(ConnectionState {
                closed: false,
                rooms: BTreeSet::new(),
                record,
                shift: None,
            }),
        });

        match conn.roster_room() {
            Some(room_id) => self.with_room(&room_id, |room| {
                self.connections.insert(id, conn.clone());
                let record = {
                    let mut st = conn.state.lock();
                    st.rooms.insert(room_id.clone());
                    st.record.clone()
                };
                room.members.insert(id, conn.clone());
                if let Some(record) = record {
                    room.publish(Delta::Connected(record));
                }
            }),
            None => {
                self.connections.insert(id, conn.clone());
            }
        }

        tracing::info!(
            connection_id = %conn.id,
            principal = %conn.principal.id,
            role = ?conn.principal.role,
            class_id = ?conn.principal.class_id,
            "Presence registered"
        );
        id
    }

    /// Add a room membership. Joining twice is a no-op.
    /// Returns whether membership changed.
    pub fn join(&self, id: ConnectionId, room_id: RoomId) -> bool {
        let Some(conn) = self.connection(id) else {
            tracing::warn!(connection_id = %id, room = %room_id, "join on unknown connection ignored");
            return false;
        };

        let joined = self.with_room(&room_id, |room| {
            let mut st = conn.state.lock();
            if st.closed || !st.rooms.insert(room_id.clone()) {
                return false;
            }
            room.members.insert(id, conn.clone());
            true
        });

        if joined {
            tracing::debug!(connection_id = %id, room = %room_id, "Joined room");
            self.touch(&conn);
        }
        joined
    }

    /// Drop a room membership or subscription. Leaving an absent room is a no-op.
    /// A learner's own class roster is only left by disconnecting.
    pub fn leave(&self, id: ConnectionId, room_id: &RoomId) -> bool {
        let Some(conn) = self.connection(id) else {
            tracing::warn!(connection_id = %id, room = %room_id, "leave on unknown connection ignored");
            return false;
        };
        if conn.roster_room().as_ref() == Some(room_id) {
            tracing::debug!(connection_id = %id, room = %room_id, "Roster room is left on disconnect only");
            return false;
        }

        let left = self.with_room(room_id, |room| {
            let mut st = conn.state.lock();
            if !st.rooms.remove(room_id) {
                return false;
            }
            room.members.remove(&id);
            room.subscribers.remove(&id);
            true
        });

        if left {
            tracing::debug!(connection_id = %id, room = %room_id, "Left room");
            self.touch(&conn);
        }
        left
    }

    /// Subscribe a teacher connection to its class room. The snapshot is
    /// computed and sent under the same room lock that gates deltas, so the
    /// subscriber sees every later change exactly once.
    pub fn subscribe(&self, id: ConnectionId) -> Result<bool, PresenceError> {
        let Some(conn) = self.connection(id) else {
            tracing::warn!(connection_id = %id, "subscribe on unknown connection ignored");
            return Ok(false);
        };
        let class_id = match (&conn.principal.class_id, conn.principal.is_teacher()) {
            (Some(class_id), true) => class_id.clone(),
            _ => return Err(PresenceError::NotATeacher),
        };
        let room_id = RoomId::Class(class_id);

        let subscribed = self.with_room(&room_id, |room| {
            {
                let mut st = conn.state.lock();
                if st.closed || !st.rooms.insert(room_id.clone()) {
                    return false;
                }
            }
            let snapshot = room.snapshot();
            send_event(&conn.sender, &ServerEvent::ClassSnapshot(snapshot));
            room.subscribers.insert(id, conn.sender.clone());
            true
        });

        if subscribed {
            tracing::info!(connection_id = %id, room = %room_id, "Teacher subscribed");
        }
        Ok(subscribed)
    }

    /// Mutate a learner's record under its class room lock and publish the
    /// resulting `updated` delta before releasing it.
    fn update_record<F>(&self, conn: &Arc<Connection>, f: F) -> Result<bool, PresenceError>
    where
        F: FnOnce(&mut ConnectionState) -> Result<(), PresenceError>,
    {
        let apply = |room: Option<&mut RoomState>| -> Result<bool, PresenceError> {
            let record = {
                let mut st = conn.state.lock();
                if st.closed {
                    return Ok(false);
                }
                if st.record.is_none() {
                    return Err(PresenceError::NotALearner);
                }
                f(&mut *st)?;
                let now = Utc::now();
                st.record.as_mut().map(|record| {
                    record.last_activity_at = now;
                    record.clone()
                })
            };
            if let (Some(room), Some(record)) = (room, record) {
                room.publish(Delta::Updated(record));
            }
            Ok(true)
        };

        match conn.roster_room() {
            Some(room_id) => self.with_room(&room_id, |room| apply(Some(room))),
            None => apply(None),
        }
    }

    /// Stamp activity on a learner's record and publish it.
    fn touch(&self, conn: &Arc<Connection>) {
        if conn.principal.is_learner() {
            let _ = self.update_record(conn, |_| Ok(()));
        }
    }

    /// Record that a connection entered a shift. Clears the current step.
    pub fn enter_shift(&self, id: ConnectionId, shift: &Shift) -> Result<bool, PresenceError> {
        let Some(conn) = self.connection(id) else {
            tracing::warn!(connection_id = %id, "enter_shift on unknown connection ignored");
            return Ok(false);
        };
        let changed = self.update_record(&conn, |st| {
            if let Some(record) = st.record.as_mut() {
                record.current_shift_ordinal = Some(shift.ordinal);
                record.current_step_id = None;
            }
            st.shift = Some(shift.clone());
            Ok(())
        })?;
        if changed {
            tracing::debug!(connection_id = %id, ordinal = shift.ordinal, "Entered shift");
        }
        Ok(changed)
    }

    /// Record a step change. Rejected without mutation before any
    /// `enter_shift` or for a step outside the entered shift.
    pub fn change_step(&self, id: ConnectionId, step_id: &str) -> Result<bool, PresenceError> {
        let Some(conn) = self.connection(id) else {
            tracing::warn!(connection_id = %id, "change_step on unknown connection ignored");
            return Ok(false);
        };
        self.update_record(&conn, |st| {
            let shift = st.shift.as_ref().ok_or(PresenceError::NoActiveShift)?;
            if !shift.contains_step(step_id) {
                return Err(PresenceError::StepNotInShift {
                    step_id: step_id.to_string(),
                    ordinal: shift.ordinal,
                });
            }
            if let Some(record) = st.record.as_mut() {
                record.current_step_id = Some(step_id.to_string());
            }
            Ok(())
        })
    }

    /// Remove a connection and every membership it held. Only the first call
    /// for a connection has any effect; concurrent close signals collapse
    /// into a single `disconnected` delta per room.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let Some(conn) = self.connection(id) else {
            tracing::debug!(connection_id = %id, "disconnect on unknown connection ignored");
            return false;
        };

        let rooms = {
            let mut st = conn.state.lock();
            if st.closed {
                return false;
            }
            st.closed = true;
            std::mem::take(&mut st.rooms)
        };
        self.connections.remove(&id);

        for room_id in &rooms {
            self.with_room(room_id, |room| {
                let was_member = room.members.remove(&id).is_some();
                room.subscribers.remove(&id);
                if was_member && room_id.is_class() {
                    let learner_id = conn.state.lock().record.as_ref().map(|r| r.learner_id.clone());
                    if let Some(user_id) = learner_id {
                        room.publish(Delta::Disconnected {
                            user_id,
                            connection_id: id,
                        });
                    }
                }
            });
        }

        tracing::info!(
            connection_id = %conn.id,
            principal = %conn.principal.id,
            rooms = rooms.len(),
            "Presence removed"
        );
        true
    }

    /// Current records of every learner connection in a class.
    pub fn snapshot(&self, class_id: &str) -> Vec<PresenceRecord> {
        self.with_room(&RoomId::class(class_id), |room| room.snapshot())
    }

    /// The shift a connection last entered.
    pub fn current_shift(&self, id: ConnectionId) -> Option<Shift> {
        self.connection(id)?.state.lock().shift.clone()
    }

    pub fn record(&self, id: ConnectionId) -> Option<PresenceRecord> {
        self.connection(id)?.state.lock().record.clone()
    }

    pub fn rooms_of(&self, id: ConnectionId) -> BTreeSet<RoomId> {
        self.connection(id)
            .map(|conn| conn.state.lock().rooms.clone())
            .unwrap_or_default()
    }

    pub fn members(&self, room_id: &RoomId) -> Vec<ConnectionId> {
        self.rooms
            .get(room_id)
            .map(|room| room.value().clone())
            .map(|room| room.state.lock().members.values().map(|conn| conn.id).collect())
            .unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Classes with at least one live member or subscriber.
    pub fn active_classes(&self) -> Vec<String> {
        self.rooms
            .iter()
            .filter_map(|entry| match entry.key() {
                RoomId::Class(class_id) => Some(class_id.clone()),
                RoomId::Shift { .. } => None,
            })
            .collect()
    }

    /// Send an event to every live connection of one learner.
    pub fn notify_learner(&self, learner_id: &str, event: &ServerEvent) {
        let targets: Vec<ConnectionSender> = self
            .connections
            .iter()
            .filter(|entry| {
                entry.value().principal.is_learner() && entry.value().principal.id == learner_id
            })
            .map(|entry| entry.value().sender.clone())
            .collect();
        for sender in &targets {
            send_event(sender, event);
        }
    }

    /// Send each learner on a class roster an event built for them.
    pub fn notify_class_learners<F>(&self, class_id: &str, event_for: F)
    where
        F: Fn(&str) -> ServerEvent,
    {
        self.with_room(&RoomId::class(class_id), |room| {
            for conn in room.members.values() {
                send_event(&conn.sender, &event_for(&conn.principal.id));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use axum::extract::ws::Message;
    use std::collections::BTreeMap;
    use std::sync::Barrier;
    use tokio::sync::mpsc;

    fn learner(id: &str, class_id: &str) -> Principal {
        Principal {
            id: id.to_string(),
            role: Role::Learner,
            display_label: id.to_uppercase(),
            class_id: Some(class_id.to_string()),
        }
    }

    fn teacher(id: &str, class_id: &str) -> Principal {
        Principal {
            id: id.to_string(),
            role: Role::Teacher,
            display_label: id.to_string(),
            class_id: Some(class_id.to_string()),
        }
    }

    fn week(ordinal: u32) -> Shift {
        Shift::new(
            format!("week-{ordinal}"),
            ordinal,
            vec!["briefing".to_string(), "grammar".to_string()],
        )
    }

    fn channel() -> (ConnectionSender, mpsc::UnboundedReceiver<Message>) {
        mpsc::unbounded_channel()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let Message::Text(text) = msg {
                events.push(serde_json::from_str(text.as_str()).unwrap());
            }
        }
        events
    }

    #[test]
    fn test_learner_scenario_seen_by_subscribed_teacher() {
        let registry = PresenceRegistry::new();
        let (ltx, _lrx) = channel();
        let l = registry.connect(learner("ana", "class-a"), ltx);
        assert!(registry.join(l, RoomId::shift(Some("class-a"), "week-1")));
        registry.enter_shift(l, &week(1)).unwrap();

        let (ttx, mut trx) = channel();
        let t = registry.connect(teacher("tess", "class-a"), ttx);
        assert!(registry.subscribe(t).unwrap());

        registry.change_step(l, "briefing").unwrap();
        registry.disconnect(l);

        let events = drain(&mut trx);
        assert_eq!(events.len(), 3, "{events:?}");
        match &events[0] {
            ServerEvent::ClassSnapshot(records) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].learner_id, "ana");
                assert_eq!(records[0].current_shift_ordinal, Some(1));
                assert_eq!(records[0].current_step_id, None);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
        match &events[1] {
            ServerEvent::StudentStatusUpdated(record) => {
                assert_eq!(record.current_step_id.as_deref(), Some("briefing"));
            }
            other => panic!("expected update, got {other:?}"),
        }
        match &events[2] {
            ServerEvent::StudentDisconnected(departure) => {
                assert_eq!(departure.user_id, "ana");
                assert_eq!(departure.connection_id, l);
            }
            other => panic!("expected disconnect, got {other:?}"),
        }
        assert!(registry.snapshot("class-a").is_empty());
    }

    #[test]
    fn test_change_step_rejected_before_enter_shift() {
        let registry = PresenceRegistry::new();
        let (ltx, _lrx) = channel();
        let l = registry.connect(learner("ana", "class-a"), ltx);
        let (ttx, mut trx) = channel();
        let t = registry.connect(teacher("tess", "class-a"), ttx);
        registry.subscribe(t).unwrap();
        drain(&mut trx);

        assert_eq!(
            registry.change_step(l, "briefing"),
            Err(PresenceError::NoActiveShift)
        );
        assert_eq!(registry.record(l).unwrap().current_step_id, None);
        assert!(drain(&mut trx).is_empty());
    }

    #[test]
    fn test_change_step_rejects_step_from_other_shift() {
        let registry = PresenceRegistry::new();
        let (ltx, _lrx) = channel();
        let l = registry.connect(learner("ana", "class-a"), ltx);
        registry.enter_shift(l, &week(1)).unwrap();
        registry.change_step(l, "grammar").unwrap();

        let err = registry.change_step(l, "karaoke").unwrap_err();
        assert_eq!(
            err,
            PresenceError::StepNotInShift {
                step_id: "karaoke".to_string(),
                ordinal: 1
            }
        );
        assert_eq!(
            registry.record(l).unwrap().current_step_id.as_deref(),
            Some("grammar")
        );
    }

    #[test]
    fn test_enter_shift_clears_step() {
        let registry = PresenceRegistry::new();
        let (ltx, _lrx) = channel();
        let l = registry.connect(learner("ana", "class-a"), ltx);
        registry.enter_shift(l, &week(1)).unwrap();
        registry.change_step(l, "grammar").unwrap();
        registry.enter_shift(l, &week(2)).unwrap();

        let record = registry.record(l).unwrap();
        assert_eq!(record.current_shift_ordinal, Some(2));
        assert_eq!(record.current_step_id, None);
        assert!(record.last_activity_at >= record.connected_at);
    }

    #[test]
    fn test_join_and_leave_are_idempotent() {
        let registry = PresenceRegistry::new();
        let (ltx, _lrx) = channel();
        let l = registry.connect(learner("ana", "class-a"), ltx);
        let (ttx, mut trx) = channel();
        let t = registry.connect(teacher("tess", "class-a"), ttx);
        registry.subscribe(t).unwrap();
        drain(&mut trx);

        let room = RoomId::shift(Some("class-a"), "week-1");
        assert!(registry.join(l, room.clone()));
        assert!(!registry.join(l, room.clone()));
        assert_eq!(registry.members(&room), vec![l]);
        assert_eq!(drain(&mut trx).len(), 1, "only the first join is visible");

        let other = RoomId::shift(Some("class-a"), "week-2");
        assert!(!registry.leave(l, &other));
        assert!(registry.leave(l, &room));
        assert!(!registry.leave(l, &room));
        assert!(registry.members(&room).is_empty());
        assert_eq!(drain(&mut trx).len(), 1, "only the first leave is visible");
    }

    #[test]
    fn test_second_subscribe_sends_no_second_snapshot() {
        let registry = PresenceRegistry::new();
        let (ttx, mut trx) = channel();
        let t = registry.connect(teacher("tess", "class-a"), ttx);
        assert!(registry.subscribe(t).unwrap());
        assert!(!registry.subscribe(t).unwrap());
        assert_eq!(drain(&mut trx).len(), 1);
    }

    #[test]
    fn test_learner_cannot_subscribe() {
        let registry = PresenceRegistry::new();
        let (ltx, _lrx) = channel();
        let l = registry.connect(learner("ana", "class-a"), ltx);
        assert_eq!(registry.subscribe(l), Err(PresenceError::NotATeacher));
    }

    #[test]
    fn test_teacher_never_sees_other_class() {
        let registry = PresenceRegistry::new();
        let (ttx, mut trx) = channel();
        let t = registry.connect(teacher("tess", "class-a"), ttx);
        registry.subscribe(t).unwrap();
        drain(&mut trx);

        let (ltx, _lrx) = channel();
        let l = registry.connect(learner("bo", "class-b"), ltx);
        registry.enter_shift(l, &week(1)).unwrap();
        registry.disconnect(l);

        assert!(drain(&mut trx).is_empty());
    }

    #[test]
    fn test_unknown_connection_operations_are_noops() {
        let registry = PresenceRegistry::new();
        let ghost = ConnectionId::new();
        assert!(!registry.join(ghost, RoomId::class("class-a")));
        assert!(!registry.leave(ghost, &RoomId::class("class-a")));
        assert_eq!(registry.enter_shift(ghost, &week(1)), Ok(false));
        assert_eq!(registry.change_step(ghost, "briefing"), Ok(false));
        assert_eq!(registry.subscribe(ghost), Ok(false));
        assert!(!registry.disconnect(ghost));
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_disconnect_leaves_every_room_without_leak() {
        let registry = PresenceRegistry::new();
        let (ltx, _lrx) = channel();
        let l = registry.connect(learner("ana", "class-a"), ltx);
        registry.join(l, RoomId::shift(Some("class-a"), "week-1"));
        registry.join(l, RoomId::shift(Some("class-a"), "week-2"));
        assert_eq!(registry.rooms_of(l).len(), 3);
        assert_eq!(registry.room_count(), 3);

        assert!(registry.disconnect(l));
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.room_count(), 0);
        assert!(registry.rooms_of(l).is_empty());

        // Operations racing the disconnect are absorbed
        assert_eq!(registry.enter_shift(l, &week(1)), Ok(false));
    }

    #[test]
    fn test_multiple_tabs_are_separate_records() {
        let registry = PresenceRegistry::new();
        let (atx, _arx) = channel();
        let (btx, _brx) = channel();
        let a = registry.connect(learner("ana", "class-a"), atx);
        let b = registry.connect(learner("ana", "class-a"), btx);
        assert_ne!(a, b);
        assert_eq!(registry.snapshot("class-a").len(), 2);

        registry.disconnect(a);
        let remaining = registry.snapshot("class-a");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].learner_id, "ana");
        assert_eq!(remaining[0].connection_id, b);
    }

    #[test]
    fn test_concurrent_close_signals_yield_one_disconnect() {
        let registry = PresenceRegistry::new();
        let (ttx, mut trx) = channel();
        let t = registry.connect(teacher("tess", "class-a"), ttx);
        registry.subscribe(t).unwrap();
        let (ltx, _lrx) = channel();
        let l = registry.connect(learner("ana", "class-a"), ltx);
        drain(&mut trx);

        let barrier = Barrier::new(8);
        let wins: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        registry.disconnect(l)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| usize::from(h.join().unwrap()))
                .sum()
        });

        assert_eq!(wins, 1);
        let disconnects = drain(&mut trx)
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::StudentDisconnected(_)))
            .count();
        assert_eq!(disconnects, 1);
    }

    #[test]
    fn test_snapshot_then_deltas_reconstruct_registry_state() {
        let registry = PresenceRegistry::new();
        let (ttx, mut trx) = channel();

        std::thread::scope(|s| {
            let churn = s.spawn(|| {
                let mut live = Vec::new();
                for i in 0..200u32 {
                    let (tx, _rx) = channel();
                    let id = registry.connect(learner(&format!("l{}", i % 7), "class-a"), tx);
                    let _ = registry.enter_shift(id, &week(1 + i % 3));
                    let _ = registry.change_step(id, "briefing");
                    live.push(id);
                    if i % 3 == 0 {
                        registry.disconnect(live.remove(0));
                    }
                }
            });
            let subscriber = s.spawn(|| {
                std::thread::yield_now();
                let t = registry.connect(teacher("tess", "class-a"), ttx);
                registry.subscribe(t).unwrap();
            });
            churn.join().unwrap();
            subscriber.join().unwrap();
        });

        let mut view: BTreeMap<ConnectionId, PresenceRecord> = BTreeMap::new();
        let mut saw_snapshot = false;
        for event in drain(&mut trx) {
            match event {
                ServerEvent::ClassSnapshot(records) => {
                    assert!(!saw_snapshot, "exactly one snapshot");
                    saw_snapshot = true;
                    view = records.into_iter().map(|r| (r.connection_id, r)).collect();
                }
                ServerEvent::StudentConnected(record) => {
                    assert!(saw_snapshot);
                    assert!(view.insert(record.connection_id, record).is_none());
                }
                ServerEvent::StudentStatusUpdated(record) => {
                    assert!(view.contains_key(&record.connection_id));
                    view.insert(record.connection_id, record);
                }
                ServerEvent::StudentDisconnected(departure) => {
                    assert!(view.remove(&departure.connection_id).is_some());
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        assert!(saw_snapshot);
        let expected: BTreeMap<ConnectionId, PresenceRecord> = registry
            .snapshot("class-a")
            .into_iter()
            .map(|r| (r.connection_id, r))
            .collect();
        assert_eq!(view, expected);
    }
}
