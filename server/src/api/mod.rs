//! REST surface beside the socket: gate reads, teacher unlock management
//! and progress writes.

pub mod gate;
pub mod presence;
pub mod progress;
pub mod unlocks;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::auth::middleware::Claims;
use crate::auth::Principal;
use crate::gate::Shift;
use crate::state::AppState;
use crate::store::StoreError;

pub type ApiError = (StatusCode, String);

/// Derive the caller's principal, rejecting claims the socket would also reject.
fn principal(claims: Claims) -> Result<Principal, ApiError> {
    Principal::try_from(claims).map_err(|e| (StatusCode::FORBIDDEN, e.to_string()))
}

pub(crate) fn require_learner(claims: Claims) -> Result<Principal, ApiError> {
    let principal = principal(claims)?;
    if !principal.is_learner() {
        return Err((StatusCode::FORBIDDEN, "Learners only".to_string()));
    }
    Ok(principal)
}

/// Teachers always carry a class; returns it alongside the principal.
pub(crate) fn require_teacher(claims: Claims) -> Result<(Principal, String), ApiError> {
    let principal = principal(claims)?;
    match (principal.is_teacher(), principal.class_id.clone()) {
        (true, Some(class_id)) => Ok((principal, class_id)),
        _ => Err((StatusCode::FORBIDDEN, "Teachers only".to_string())),
    }
}

pub(crate) fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::UnknownShift(_) | StoreError::UnknownStep { .. } => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        StoreError::Conflict { .. } => (StatusCode::CONFLICT, err.to_string()),
        StoreError::Database(_) | StoreError::Lock | StoreError::Task(_) => {
            tracing::error!(error = %err, "Store call failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Store unavailable".to_string())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
    pub rooms: usize,
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.presence.connection_count(),
        rooms: state.presence.room_count(),
    })
}

/// GET /api/curriculum: Shifts with their ordered steps.
pub async fn curriculum(State(state): State<AppState>, _claims: Claims) -> Json<Vec<Shift>> {
    Json(state.curriculum.shifts().to_vec())
}
