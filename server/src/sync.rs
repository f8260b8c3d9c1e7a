//! Keeps learners' `student:gate` views in step with the stores.
//!
//! Everything here runs on Tokio tasks; the registry is only touched
//! through its synchronous notify calls, after the awaited store work.

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::auth::Principal;
use crate::gate::GatePosition;
use crate::proto::ServerEvent;
use crate::state::AppState;

/// Gate position from cached inputs.
pub fn gate_position(state: &AppState, learner_id: &str, class_id: Option<&str>) -> GatePosition {
    state
        .gate_cache
        .position(&state.curriculum, learner_id, class_id)
}

/// Send the learner's current gate to every one of their live connections.
pub fn push_learner_gate(state: &AppState, learner_id: &str, class_id: Option<&str>) {
    let position = gate_position(state, learner_id, class_id);
    state
        .presence
        .notify_learner(learner_id, &ServerEvent::Gate(position));
}

/// Send every learner on a class roster their own current gate.
pub fn push_class_gates(state: &AppState, class_id: &str) {
    state.presence.notify_class_learners(class_id, |learner_id| {
        ServerEvent::Gate(gate_position(state, learner_id, Some(class_id)))
    });
}

/// Load a connecting principal's gate inputs into the cache, bounded by the
/// store timeout. A learner with a class is also enrolled so unlock conflicts
/// can see them. Failures leave whatever was cached.
pub async fn prefetch(state: &AppState, principal: &Principal) {
    let timeout = state.timings.store_timeout;
    let class_id = principal.class_id.as_deref();

    if principal.is_learner() {
        state
            .gate_cache
            .refresh_progress(state.progress_store.as_ref(), &principal.id, timeout)
            .await;
        if let Some(class_id) = class_id {
            match tokio::time::timeout(
                timeout,
                state.unlock_store.enroll_learner(class_id, &principal.id),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    learner_id = %principal.id,
                    class_id = %class_id,
                    error = %e,
                    "Failed to record class enrollment"
                ),
                Err(_) => tracing::warn!(
                    learner_id = %principal.id,
                    class_id = %class_id,
                    "Class enrollment timed out"
                ),
            }
        }
    }

    if let Some(class_id) = class_id {
        state
            .gate_cache
            .refresh_unlocks(state.unlock_store.as_ref(), class_id, timeout)
            .await;
    }
}

/// Reload one learner's progress and push their gate.
pub async fn refresh_learner(state: &AppState, learner_id: &str, class_id: Option<&str>) {
    let (_, changed) = state
        .gate_cache
        .refresh_progress(
            state.progress_store.as_ref(),
            learner_id,
            state.timings.store_timeout,
        )
        .await;
    tracing::debug!(learner_id = %learner_id, changed, "Progress refreshed");
    push_learner_gate(state, learner_id, class_id);
}

/// Reload a learner's progress and their class's unlock set without pushing.
/// Used to confirm a navigation rejection against the stores.
pub async fn reload_gate_inputs(state: &AppState, learner_id: &str, class_id: Option<&str>) {
    let timeout = state.timings.store_timeout;
    state
        .gate_cache
        .refresh_progress(state.progress_store.as_ref(), learner_id, timeout)
        .await;
    if let Some(class_id) = class_id {
        state
            .gate_cache
            .refresh_unlocks(state.unlock_store.as_ref(), class_id, timeout)
            .await;
    }
}

/// Reload a learner's progress on a background task after a navigation
/// event. A new gate is pushed only when the stored progress moved.
pub fn spawn_learner_refresh(state: &AppState, principal: &Principal) -> JoinHandle<()> {
    let state = state.clone();
    let learner_id = principal.id.clone();
    let class_id = principal.class_id.clone();
    tokio::spawn(async move {
        let (_, changed) = state
            .gate_cache
            .refresh_progress(
                state.progress_store.as_ref(),
                &learner_id,
                state.timings.store_timeout,
            )
            .await;
        if changed {
            tracing::debug!(learner_id = %learner_id, "Progress moved, pushing gate");
            push_learner_gate(&state, &learner_id, class_id.as_deref());
        }
    })
}

/// Reload a class's unlock set and push gates to its learners.
pub async fn refresh_class(state: &AppState, class_id: &str) {
    let (_, changed) = state
        .gate_cache
        .refresh_unlocks(
            state.unlock_store.as_ref(),
            class_id,
            state.timings.store_timeout,
        )
        .await;
    tracing::debug!(class_id = %class_id, changed, "Unlocks refreshed");
    push_class_gates(state, class_id);
}

/// Periodically refresh unlock sets of every class with live connections.
/// Learners are only pushed a new gate when their class's set changed.
pub fn spawn_unlock_poller(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(state.timings.unlock_poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let classes = state.presence.active_classes();
            for class_id in &classes {
                let (_, changed) = state
                    .gate_cache
                    .refresh_unlocks(
                        state.unlock_store.as_ref(),
                        class_id,
                        state.timings.store_timeout,
                    )
                    .await;
                if changed {
                    tracing::info!(class_id = %class_id, "Class unlocks changed, pushing gates");
                    push_class_gates(&state, class_id);
                }
            }
        }
    })
}
