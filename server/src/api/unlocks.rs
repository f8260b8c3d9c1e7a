use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::{require_teacher, store_error, ApiError};
use crate::auth::middleware::Claims;
use crate::state::AppState;
use crate::sync;

#[derive(Debug, Serialize, Deserialize)]
pub struct UnlockSetResponse {
    pub class_id: String,
    /// Shift ids opened ahead of sequential completion, sorted
    pub shift_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnlockRequest {
    pub shift_id: String,
}

/// Read the class's unlock set from the store and report it.
async fn current_set(state: &AppState, class_id: String) -> Result<Json<UnlockSetResponse>, ApiError> {
    let unlocks = state
        .unlock_store
        .class_unlocks(&class_id)
        .await
        .map_err(store_error)?;
    state.gate_cache.put_unlocks(&class_id, unlocks.clone());
    Ok(Json(UnlockSetResponse {
        class_id,
        shift_ids: unlocks.into_iter().collect(),
    }))
}

/// GET /api/classes/unlocks: Current overrides for the teacher's class.
pub async fn list_unlocks(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<UnlockSetResponse>, ApiError> {
    let (_, class_id) = require_teacher(claims)?;
    current_set(&state, class_id).await
}

/// POST /api/classes/unlocks: Open a shift for the teacher's class.
/// Every connected learner of the class is pushed a new gate.
pub async fn unlock_week(
    State(state): State<AppState>,
    claims: Claims,
    Json(req): Json<UnlockRequest>,
) -> Result<Json<UnlockSetResponse>, ApiError> {
    let (teacher, class_id) = require_teacher(claims)?;
    state
        .unlock_store
        .unlock_week(&class_id, &req.shift_id)
        .await
        .map_err(store_error)?;

    tracing::info!(
        class_id = %class_id,
        shift_id = %req.shift_id,
        teacher = %teacher.id,
        "Shift unlocked for class"
    );
    sync::refresh_class(&state, &class_id).await;
    current_set(&state, class_id).await
}

/// DELETE /api/classes/unlocks/{shift_id}: Remove an override.
/// 409 when an enrolled learner already earned the shift sequentially.
pub async fn lock_week(
    State(state): State<AppState>,
    claims: Claims,
    Path(shift_id): Path<String>,
) -> Result<Json<UnlockSetResponse>, ApiError> {
    let (teacher, class_id) = require_teacher(claims)?;
    state
        .unlock_store
        .lock_week(&class_id, &shift_id)
        .await
        .map_err(|e| {
            tracing::warn!(class_id = %class_id, shift_id = %shift_id, error = %e, "Lock rejected");
            store_error(e)
        })?;

    tracing::info!(
        class_id = %class_id,
        shift_id = %shift_id,
        teacher = %teacher.id,
        "Shift override removed for class"
    );
    sync::refresh_class(&state, &class_id).await;
    current_set(&state, class_id).await
}
