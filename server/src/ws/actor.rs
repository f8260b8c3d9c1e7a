use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout};

use crate::auth::Principal;
use crate::presence::broadcast::send_event;
use crate::proto::ServerEvent;
use crate::state::AppState;
use crate::sync;
use crate::ws::protocol::{self, Session};

/// Close code sent when the peer stops answering pings.
const CLOSE_GOING_AWAY: u16 = 1001;

/// How long the writer may keep draining queued frames after the reader exits.
const WRITER_GRACE: Duration = Duration::from_secs(1);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Ping task: keep-alive, closes the connection when pongs stop
/// - Reader loop: decodes text frames and dispatches them to the protocol
///
/// The registry holds a clone of the channel sender, so room broadcasts
/// reach this client without going through the actor.
pub async fn run_connection(socket: WebSocket, state: AppState, principal: Principal) {
    // Hold the learner's cache entry across prefetch so an older socket's
    // teardown cannot evict what this one loads
    if principal.is_learner() {
        state.gate_cache.retain_learner(&principal.id);
    }
    // Gate inputs are loaded before the connection becomes visible
    sync::prefetch(&state, &principal).await;

    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let connection_id = state.presence.connect(principal.clone(), tx.clone());
    if principal.is_learner() {
        let position = sync::gate_position(&state, &principal.id, principal.class_id.as_deref());
        send_event(&tx, &ServerEvent::Gate(position));
    }

    tracing::info!(
        connection_id = %connection_id,
        principal = %principal.id,
        "WebSocket actor started"
    );

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = tx.clone();
    let ping_state = state.clone();
    let timings = state.timings;
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(timings.ping_interval);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died, connection is gone
                break;
            }

            match timeout(timings.pong_timeout, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!(connection_id = %connection_id, "Pong timeout, closing connection");
                    ping_state.presence.disconnect(connection_id);
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: CLOSE_GOING_AWAY,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
        let _ = shutdown_tx.send(());
    });

    let session = Session {
        connection_id,
        principal,
        tx,
    };

    // Reader loop: process incoming WebSocket messages
    loop {
        let next = tokio::select! {
            next = ws_receiver.next() => next,
            _ = &mut shutdown_rx => {
                tracing::debug!(connection_id = %connection_id, "Keep-alive ended the connection");
                break;
            }
        };

        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(text.as_str(), &session, &state).await;
                }
                Message::Binary(_) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        "Received binary frame (expected JSON text), ignoring"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = session.tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        connection_id = %connection_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(connection_id = %connection_id, "WebSocket stream ended");
                break;
            }
        }
    }

    ping_handle.abort();

    // No-op when the keep-alive already removed this connection
    state.presence.disconnect(connection_id);

    let Session { principal, tx, .. } = session;
    if principal.is_learner() {
        state.gate_cache.release_learner(&principal.id);
    }

    // Let queued frames (a close frame included) drain before tearing down
    drop(tx);
    if timeout(WRITER_GRACE, &mut writer_handle).await.is_err() {
        writer_handle.abort();
    }

    tracing::info!(
        connection_id = %connection_id,
        principal = %principal.id,
        "WebSocket actor stopped"
    );
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}
