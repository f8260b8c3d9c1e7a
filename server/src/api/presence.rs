use axum::{extract::State, Json};

use crate::api::{require_teacher, ApiError};
use crate::auth::middleware::Claims;
use crate::presence::PresenceRecord;
use crate::state::AppState;

/// GET /api/classes/presence: Point-in-time roster of the teacher's class.
/// Live updates come from `teacher:subscribe` on the socket.
pub async fn class_presence(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<PresenceRecord>>, ApiError> {
    let (_, class_id) = require_teacher(claims)?;
    Ok(Json(state.presence.snapshot(&class_id)))
}
