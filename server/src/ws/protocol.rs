//! Dispatch of client frames onto the presence registry and gate.
//!
//! A rejected frame produces one `error` event on the same connection and
//! leaves both the connection and the registry untouched.

use crate::auth::Principal;
use crate::gate::{self, Shift};
use crate::presence::broadcast::send_event;
use crate::presence::{ConnectionId, PresenceError, RoomId};
use crate::proto::{ClientEvent, ErrorPayload, ServerEvent};
use crate::state::AppState;
use crate::sync;
use crate::ws::ConnectionSender;

/// What the reader loop knows about its own connection.
pub struct Session {
    pub connection_id: ConnectionId,
    pub principal: Principal,
    pub tx: ConnectionSender,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("frame is not a known event: {0}")]
    Malformed(String),
    #[error("unknown shift {0}")]
    UnknownShift(String),
    #[error("no shift with week number {0}")]
    UnknownWeek(u32),
    #[error("shift {0} is locked")]
    ShiftLocked(u32),
    #[error("step {step_id} is beyond the navigable step of shift {ordinal}")]
    StepLocked { step_id: String, ordinal: u32 },
    #[error(transparent)]
    Presence(#[from] PresenceError),
}

impl ProtocolViolation {
    /// Stable machine-readable code carried in the `error` event.
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolViolation::Malformed(_) => "malformed_event",
            ProtocolViolation::UnknownShift(_) | ProtocolViolation::UnknownWeek(_) => {
                "unknown_shift"
            }
            ProtocolViolation::ShiftLocked(_) => "shift_locked",
            ProtocolViolation::StepLocked { .. } => "step_locked",
            ProtocolViolation::Presence(PresenceError::NoActiveShift) => "no_active_shift",
            ProtocolViolation::Presence(PresenceError::StepNotInShift { .. }) => {
                "step_not_in_shift"
            }
            ProtocolViolation::Presence(PresenceError::NotALearner) => "learner_only",
            ProtocolViolation::Presence(PresenceError::NotATeacher) => "teacher_only",
        }
    }
}

/// Handle one incoming text frame.
pub async fn handle_text_message(text: &str, session: &Session, state: &AppState) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            let name = event_name(text);
            tracing::debug!(
                connection_id = %session.connection_id,
                event = ?name,
                error = %e,
                "Failed to decode client event"
            );
            send_error(
                &session.tx,
                &ProtocolViolation::Malformed(e.to_string()),
                name,
            );
            return;
        }
    };

    let name = event.name();
    if let Err(violation) = dispatch(event, session, state).await {
        tracing::debug!(
            connection_id = %session.connection_id,
            event = name,
            code = violation.code(),
            "Client event rejected"
        );
        send_error(&session.tx, &violation, Some(name.to_string()));
    }
}

/// Dispatch a decoded event to the appropriate handler.
async fn dispatch(
    event: ClientEvent,
    session: &Session,
    state: &AppState,
) -> Result<(), ProtocolViolation> {
    match event {
        ClientEvent::JoinWeek(shift_id) => {
            let room = shift_room(session, state, &shift_id)?;
            state.presence.join(session.connection_id, room);
            Ok(())
        }
        ClientEvent::LeaveWeek(shift_id) => {
            let room = shift_room(session, state, &shift_id)?;
            state.presence.leave(session.connection_id, &room);
            Ok(())
        }
        ClientEvent::EnterShift(ordinal) => handle_enter_shift(ordinal, session, state).await,
        ClientEvent::ChangeStep(step_id) => handle_change_step(&step_id, session, state).await,
        ClientEvent::ClockOut(ordinal) => handle_clock_out(ordinal, session, state).await,
        ClientEvent::Subscribe => {
            state.presence.subscribe(session.connection_id)?;
            Ok(())
        }
        ClientEvent::Unsubscribe => {
            let class_id = teacher_class(session)?;
            state
                .presence
                .leave(session.connection_id, &RoomId::class(class_id));
            Ok(())
        }
    }
}

fn shift_room(
    session: &Session,
    state: &AppState,
    shift_id: &str,
) -> Result<RoomId, ProtocolViolation> {
    if state.curriculum.by_id(shift_id).is_none() {
        return Err(ProtocolViolation::UnknownShift(shift_id.to_string()));
    }
    Ok(RoomId::shift(session.principal.class_id.as_deref(), shift_id))
}

fn require_learner(session: &Session) -> Result<(), ProtocolViolation> {
    if session.principal.is_learner() {
        Ok(())
    } else {
        Err(PresenceError::NotALearner.into())
    }
}

fn teacher_class(session: &Session) -> Result<&str, ProtocolViolation> {
    match (&session.principal.class_id, session.principal.is_teacher()) {
        (Some(class_id), true) => Ok(class_id.as_str()),
        _ => Err(PresenceError::NotATeacher.into()),
    }
}

fn shift_accessible(state: &AppState, principal: &Principal, ordinal: u32) -> bool {
    gate::is_accessible(
        state.curriculum.shifts(),
        &state.gate_cache.unlocks(principal.class_id.as_deref()),
        &state.gate_cache.progress(&principal.id),
        ordinal,
    )
}

fn step_navigable(state: &AppState, learner_id: &str, shift: &Shift, index: usize) -> bool {
    let progress = state.gate_cache.progress(learner_id);
    gate::navigable_step_index(shift, &progress).is_some_and(|navigable| index <= navigable)
}

/// Cached gate inputs may trail the stores, so a navigation the cache would
/// refuse is checked again after a bounded reload before it is rejected.
async fn handle_enter_shift(
    ordinal: u32,
    session: &Session,
    state: &AppState,
) -> Result<(), ProtocolViolation> {
    require_learner(session)?;
    let shift = state
        .curriculum
        .by_ordinal(ordinal)
        .ok_or(ProtocolViolation::UnknownWeek(ordinal))?;

    let principal = &session.principal;
    if !shift_accessible(state, principal, ordinal) {
        sync::reload_gate_inputs(state, &principal.id, principal.class_id.as_deref()).await;
        if !shift_accessible(state, principal, ordinal) {
            return Err(ProtocolViolation::ShiftLocked(ordinal));
        }
    }

    state.presence.enter_shift(session.connection_id, shift)?;
    send_gate(session, state);
    sync::spawn_learner_refresh(state, principal);
    Ok(())
}

async fn handle_change_step(
    step_id: &str,
    session: &Session,
    state: &AppState,
) -> Result<(), ProtocolViolation> {
    require_learner(session)?;
    let shift = state
        .presence
        .current_shift(session.connection_id)
        .ok_or(PresenceError::NoActiveShift)?;
    let index = shift
        .step_index(step_id)
        .ok_or_else(|| PresenceError::StepNotInShift {
            step_id: step_id.to_string(),
            ordinal: shift.ordinal,
        })?;

    let principal = &session.principal;
    if !step_navigable(state, &principal.id, &shift, index) {
        sync::reload_gate_inputs(state, &principal.id, principal.class_id.as_deref()).await;
        if !step_navigable(state, &principal.id, &shift, index) {
            return Err(ProtocolViolation::StepLocked {
                step_id: step_id.to_string(),
                ordinal: shift.ordinal,
            });
        }
    }

    state.presence.change_step(session.connection_id, step_id)?;
    send_gate(session, state);
    sync::spawn_learner_refresh(state, principal);
    Ok(())
}

/// A clock-out is recorded by the progress service; the event only asks
/// this server to reload progress and report the resulting gate.
async fn handle_clock_out(
    ordinal: u32,
    session: &Session,
    state: &AppState,
) -> Result<(), ProtocolViolation> {
    require_learner(session)?;
    if state.curriculum.by_ordinal(ordinal).is_none() {
        return Err(ProtocolViolation::UnknownWeek(ordinal));
    }
    let principal = &session.principal;
    sync::refresh_learner(state, &principal.id, principal.class_id.as_deref()).await;
    Ok(())
}

fn send_gate(session: &Session, state: &AppState) {
    let principal = &session.principal;
    let position = sync::gate_position(state, &principal.id, principal.class_id.as_deref());
    send_event(&session.tx, &ServerEvent::Gate(position));
}

/// Send an `error` event on this connection.
fn send_error(tx: &ConnectionSender, violation: &ProtocolViolation, event: Option<String>) {
    let payload = ErrorPayload {
        code: violation.code().to_string(),
        message: violation.to_string(),
        event,
    };
    send_event(tx, &ServerEvent::Error(payload));
}

/// Best-effort event name from an undecodable frame.
fn event_name(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value.get("event")?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::gate::{GatePosition, LearnerProgress};
    use axum::extract::ws::Message;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn learner_session(state: &AppState) -> (Session, mpsc::UnboundedReceiver<Message>) {
        let principal = Principal {
            id: "ana".to_string(),
            role: Role::Learner,
            display_label: "Ana".to_string(),
            class_id: Some("class-a".to_string()),
        };
        // Same cache state a socket has after its prefetch of an empty store
        state
            .gate_cache
            .put_progress(&principal.id, LearnerProgress::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = state.presence.connect(principal.clone(), tx.clone());
        (
            Session {
                connection_id,
                principal,
                tx,
            },
            rx,
        )
    }

    fn next_event(rx: &mut mpsc::UnboundedReceiver<Message>) -> ServerEvent {
        match rx.try_recv() {
            Ok(Message::Text(text)) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    /// Wait for a pushed gate matching `pred`, skipping other frames.
    async fn wait_for_gate(
        rx: &mut mpsc::UnboundedReceiver<Message>,
        pred: impl Fn(&GatePosition) -> bool,
    ) -> GatePosition {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match rx.recv().await {
                    Some(Message::Text(text)) => {
                        match serde_json::from_str::<ServerEvent>(text.as_str()).unwrap() {
                            ServerEvent::Gate(position) if pred(&position) => return position,
                            ServerEvent::Error(payload) => panic!("unexpected error {payload:?}"),
                            _ => {}
                        }
                    }
                    other => panic!("expected a text frame, got {other:?}"),
                }
            }
        })
        .await
        .expect("no matching gate within 2s")
    }

    fn expect_error(rx: &mut mpsc::UnboundedReceiver<Message>, code: &str) -> ErrorPayload {
        match next_event(rx) {
            ServerEvent::Error(payload) => {
                assert_eq!(payload.code, code);
                payload
            }
            other => panic!("expected error {code}, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_enter_locked_shift_is_rejected_without_mutation() {
        let state = AppState::for_tests();
        let (session, mut rx) = learner_session(&state);

        handle_text_message(
            r#"{"event":"student:enter-shift","data":2}"#,
            &session,
            &state,
        )
        .await;

        let payload = expect_error(&mut rx, "shift_locked");
        assert_eq!(payload.event.as_deref(), Some("student:enter-shift"));
        let record = state.presence.record(session.connection_id).unwrap();
        assert_eq!(record.current_shift_ordinal, None);
    }

    #[tokio::test]
    async fn test_teacher_unlock_opens_shift() {
        let state = AppState::for_tests();
        state
            .gate_cache
            .put_unlocks("class-a", ["week-3".to_string()].into_iter().collect());
        let (session, mut rx) = learner_session(&state);

        handle_text_message(
            r#"{"event":"student:enter-shift","data":3}"#,
            &session,
            &state,
        )
        .await;

        match next_event(&mut rx) {
            ServerEvent::Gate(position) => {
                assert_eq!(position.accessible_ordinals, vec![1, 3]);
            }
            other => panic!("expected gate, got {other:?}"),
        }
        let record = state.presence.record(session.connection_id).unwrap();
        assert_eq!(record.current_shift_ordinal, Some(3));
    }

    #[tokio::test]
    async fn test_step_beyond_navigable_index_is_locked() {
        let state = AppState::for_tests();
        let (session, mut rx) = learner_session(&state);

        handle_text_message(
            r#"{"event":"student:enter-shift","data":1}"#,
            &session,
            &state,
        )
        .await;
        assert!(matches!(next_event(&mut rx), ServerEvent::Gate(_)));

        handle_text_message(
            r#"{"event":"student:change-step","data":"grammar"}"#,
            &session,
            &state,
        )
        .await;
        expect_error(&mut rx, "step_locked");

        handle_text_message(
            r#"{"event":"student:change-step","data":"briefing"}"#,
            &session,
            &state,
        )
        .await;
        assert!(matches!(next_event(&mut rx), ServerEvent::Gate(_)));
        let record = state.presence.record(session.connection_id).unwrap();
        assert_eq!(record.current_step_id.as_deref(), Some("briefing"));
    }

    #[tokio::test]
    async fn test_change_step_before_enter_shift() {
        let state = AppState::for_tests();
        let (session, mut rx) = learner_session(&state);

        handle_text_message(
            r#"{"event":"student:change-step","data":"briefing"}"#,
            &session,
            &state,
        )
        .await;
        expect_error(&mut rx, "no_active_shift");
    }

    #[tokio::test]
    async fn test_malformed_frames_keep_event_name_when_possible() {
        let state = AppState::for_tests();
        let (session, mut rx) = learner_session(&state);

        handle_text_message(r#"{"event":"student:teleport","data":1}"#, &session, &state).await;
        let payload = expect_error(&mut rx, "malformed_event");
        assert_eq!(payload.event.as_deref(), Some("student:teleport"));

        handle_text_message("not json", &session, &state).await;
        let payload = expect_error(&mut rx, "malformed_event");
        assert_eq!(payload.event, None);
    }

    #[tokio::test]
    async fn test_unknown_shift_and_role_violations() {
        let state = AppState::for_tests();
        let (session, mut rx) = learner_session(&state);

        handle_text_message(r#"{"event":"join:week","data":"week-99"}"#, &session, &state).await;
        expect_error(&mut rx, "unknown_shift");

        handle_text_message(r#"{"event":"teacher:subscribe"}"#, &session, &state).await;
        expect_error(&mut rx, "teacher_only");

        handle_text_message(r#"{"event":"join:week","data":"week-1"}"#, &session, &state).await;
        assert!(rx.try_recv().is_err(), "join produces no reply");
        assert!(state
            .presence
            .rooms_of(session.connection_id)
            .contains(&RoomId::shift(Some("class-a"), "week-1")));
    }

    #[tokio::test]
    async fn test_step_recorded_elsewhere_unlocks_navigation() {
        let state = AppState::for_tests();
        let (session, mut rx) = learner_session(&state);

        handle_text_message(
            r#"{"event":"student:enter-shift","data":1}"#,
            &session,
            &state,
        )
        .await;
        assert!(matches!(next_event(&mut rx), ServerEvent::Gate(_)));

        // Written by the scoring flow, not through this server
        state
            .progress_store
            .record_step_complete("ana", "week-1", "briefing")
            .await
            .unwrap();

        handle_text_message(
            r#"{"event":"student:change-step","data":"grammar"}"#,
            &session,
            &state,
        )
        .await;
        let position = wait_for_gate(&mut rx, |p| p.navigable_step_index == Some(1)).await;
        assert_eq!(position.current_shift_ordinal, Some(1));
        let record = state.presence.record(session.connection_id).unwrap();
        assert_eq!(record.current_step_id.as_deref(), Some("grammar"));
    }

    #[tokio::test]
    async fn test_enter_shift_pushes_gate_when_stored_progress_moved() {
        let state = AppState::for_tests();
        let (session, mut rx) = learner_session(&state);
        state
            .progress_store
            .record_step_complete("ana", "week-1", "briefing")
            .await
            .unwrap();

        handle_text_message(
            r#"{"event":"student:enter-shift","data":1}"#,
            &session,
            &state,
        )
        .await;

        // The immediate reply comes from the cache; the background reload
        // follows with the stored step
        match next_event(&mut rx) {
            ServerEvent::Gate(position) => assert_eq!(position.navigable_step_index, Some(0)),
            other => panic!("expected gate, got {other:?}"),
        }
        wait_for_gate(&mut rx, |p| p.navigable_step_index == Some(1)).await;
        assert!(state.gate_cache.progress("ana").step_complete("week-1", "briefing"));
    }

    #[tokio::test]
    async fn test_shift_earned_elsewhere_can_be_entered() {
        let state = AppState::for_tests();
        let (session, mut rx) = learner_session(&state);
        state
            .progress_store
            .record_shift_clocked_out("ana", "week-1")
            .await
            .unwrap();

        handle_text_message(
            r#"{"event":"student:enter-shift","data":2}"#,
            &session,
            &state,
        )
        .await;

        let position = wait_for_gate(&mut rx, |p| p.current_shift_ordinal == Some(2)).await;
        assert_eq!(position.accessible_ordinals, vec![1, 2]);
        let record = state.presence.record(session.connection_id).unwrap();
        assert_eq!(record.current_shift_ordinal, Some(2));
    }
}
