use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::{jwt, Principal};
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
/// Browsers cannot set headers on the upgrade request, so the token rides in ?token=.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: String,
}

/// Handshake close codes:
/// 4001 = token expired
/// 4002 = token invalid
/// 4003 = principal not admissible
pub const CLOSE_TOKEN_EXPIRED: u16 = 4001;
pub const CLOSE_TOKEN_INVALID: u16 = 4002;
pub const CLOSE_NOT_ADMISSIBLE: u16 = 4003;

/// GET /ws?token=JWT
/// On handshake failure, upgrades then immediately closes with the matching code.
/// On success, runs the connection actor.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match jwt::validate_access_token(&state.jwt_secret, &params.token) {
        Ok(claims) => claims,
        Err(err) => {
            let (close_code, reason) = match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    (CLOSE_TOKEN_EXPIRED, "Token expired")
                }
                _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };
            tracing::warn!(close_code, reason, "WebSocket auth failed");
            return reject(ws, close_code, reason);
        }
    };

    match Principal::try_from(claims) {
        Ok(principal) => {
            tracing::info!(
                principal = %principal.id,
                role = ?principal.role,
                class_id = ?principal.class_id,
                "WebSocket connection authenticated"
            );
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, principal))
        }
        Err(err) => {
            tracing::warn!(
                close_code = CLOSE_NOT_ADMISSIBLE,
                error = %err,
                "WebSocket principal rejected"
            );
            reject(ws, CLOSE_NOT_ADMISSIBLE, "Principal not admissible")
        }
    }
}

/// Upgrade the connection, then immediately close with the error code.
fn reject(ws: WebSocketUpgrade, code: u16, reason: &'static str) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        let close_frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        let _ = socket.send(Message::Close(Some(close_frame))).await;
    })
}
