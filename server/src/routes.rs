use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::api::{self, gate, presence, progress, unlocks};
use crate::auth::middleware::JwtSecret;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new().route("/api/health", get(api::health));

    // Learner routes (JWT required, learner role checked per handler)
    let learner_routes = Router::new()
        .route("/api/curriculum", get(api::curriculum))
        .route("/api/gate", get(gate::get_gate))
        .route("/api/progress/steps", post(progress::complete_step))
        .route("/api/progress/clock-out", post(progress::clock_out));

    // Teacher routes, scoped to the class bound in the token
    let teacher_routes = Router::new()
        .route("/api/classes/presence", get(presence::class_presence))
        .route(
            "/api/classes/unlocks",
            get(unlocks::list_unlocks).post(unlocks::unlock_week),
        )
        .route("/api/classes/unlocks/{shift_id}", delete(unlocks::lock_week));

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    Router::new()
        .merge(public_routes)
        .merge(learner_routes)
        .merge(teacher_routes)
        .merge(ws_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}
