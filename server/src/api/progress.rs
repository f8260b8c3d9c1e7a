use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;

use crate::api::{require_learner, store_error, ApiError};
use crate::auth::middleware::Claims;
use crate::gate::GatePosition;
use crate::state::AppState;
use crate::sync;

#[derive(Debug, Deserialize)]
pub struct StepCompleteRequest {
    pub shift_id: String,
    pub step_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ClockOutRequest {
    pub shift_id: String,
}

/// POST /api/progress/steps: Record a completed step for the caller.
/// Returns the resulting gate, which is also pushed to the caller's sockets.
pub async fn complete_step(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<StepCompleteRequest>,
) -> Result<(StatusCode, Json<GatePosition>), ApiError> {
    let principal = require_learner(claims)?;
    state
        .progress_store
        .record_step_complete(&principal.id, &req.shift_id, &req.step_id)
        .await
        .map_err(store_error)?;

    tracing::debug!(
        learner_id = %principal.id,
        shift_id = %req.shift_id,
        step_id = %req.step_id,
        "Step completed"
    );
    let class_id = principal.class_id.as_deref();
    sync::refresh_learner(&state, &principal.id, class_id).await;
    Ok((
        StatusCode::CREATED,
        Json(sync::gate_position(&state, &principal.id, class_id)),
    ))
}

/// POST /api/progress/clock-out: Mark a shift complete for the caller.
pub async fn clock_out(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<ClockOutRequest>,
) -> Result<(StatusCode, Json<GatePosition>), ApiError> {
    let principal = require_learner(claims)?;
    state
        .progress_store
        .record_shift_clocked_out(&principal.id, &req.shift_id)
        .await
        .map_err(store_error)?;

    tracing::info!(
        learner_id = %principal.id,
        shift_id = %req.shift_id,
        "Shift clocked out"
    );
    let class_id = principal.class_id.as_deref();
    sync::refresh_learner(&state, &principal.id, class_id).await;
    Ok((
        StatusCode::CREATED,
        Json(sync::gate_position(&state, &principal.id, class_id)),
    ))
}
