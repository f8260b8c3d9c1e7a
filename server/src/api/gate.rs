use axum::{extract::State, Json};

use crate::api::{require_learner, ApiError};
use crate::auth::middleware::Claims;
use crate::gate::GatePosition;
use crate::state::AppState;
use crate::sync;

/// GET /api/gate: The caller's gate position, freshly loaded.
/// A slow or failing store falls back to the cached inputs.
pub async fn get_gate(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<GatePosition>, ApiError> {
    let principal = require_learner(claims)?;
    let class_id = principal.class_id.as_deref();
    let timeout = state.timings.store_timeout;

    state
        .gate_cache
        .refresh_progress(state.progress_store.as_ref(), &principal.id, timeout)
        .await;
    if let Some(class_id) = class_id {
        state
            .gate_cache
            .refresh_unlocks(state.unlock_store.as_ref(), class_id, timeout)
            .await;
    }

    Ok(Json(sync::gate_position(&state, &principal.id, class_id)))
}
