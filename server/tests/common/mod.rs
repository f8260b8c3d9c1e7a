//! Shared harness: a real server on a random port over a temp data dir.
#![allow(dead_code)]

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use shiftsync_server::auth::{jwt, Principal, Role};
use shiftsync_server::state::{AppState, Timings};
use shiftsync_server::store::SqliteStore;

pub type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
pub type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub struct TestServer {
    pub base_url: String,
    pub addr: SocketAddr,
    pub state: AppState,
    _data_dir: tempfile::TempDir,
}

/// Start the server with default timings and a seeded four-week curriculum.
pub async fn start_test_server() -> TestServer {
    start_test_server_with(Timings::default()).await
}

pub async fn start_test_server_with(timings: Timings) -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = shiftsync_server::db::init_db(&data_dir).expect("Failed to init DB");
    shiftsync_server::curriculum::seed::seed_starter_curriculum(&db).expect("Failed to seed");
    let curriculum =
        Arc::new(shiftsync_server::curriculum::load(&db).expect("Failed to load curriculum"));
    let jwt_secret = jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let store = Arc::new(SqliteStore::new(db, curriculum.clone()));
    let state = AppState::new(jwt_secret, curriculum, store.clone(), store, timings);

    let app = shiftsync_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        base_url: format!("http://{}", addr),
        addr,
        state,
        _data_dir: tmp_dir,
    }
}

impl TestServer {
    pub fn token(&self, id: &str, role: Role, class_id: Option<&str>) -> String {
        let principal = Principal {
            id: id.to_string(),
            role,
            display_label: id.to_uppercase(),
            class_id: class_id.map(str::to_string),
        };
        jwt::issue_access_token(&self.state.jwt_secret, &principal).unwrap()
    }

    pub fn learner_token(&self, id: &str, class_id: &str) -> String {
        self.token(id, Role::Learner, Some(class_id))
    }

    pub fn teacher_token(&self, id: &str, class_id: &str) -> String {
        self.token(id, Role::Teacher, Some(class_id))
    }

    pub async fn connect(&self, token: &str) -> (WsWrite, WsRead) {
        let ws_url = format!("ws://{}/ws?token={}", self.addr, token);
        let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
            .await
            .expect("Failed to connect to WebSocket");
        ws_stream.split()
    }
}

pub async fn send_json(write: &mut WsWrite, frame: Value) {
    write
        .send(Message::Text(frame.to_string().into()))
        .await
        .expect("Failed to send frame");
}

/// Next JSON event, skipping keep-alive frames. Panics after two seconds.
pub async fn next_event(read: &mut WsRead) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("Timed out waiting for an event")
            .expect("Stream ended")
            .expect("WebSocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Unexpected frame: {:?}", other),
        }
    }
}

/// Next event, asserting its name.
pub async fn expect_event(read: &mut WsRead, name: &str) -> Value {
    let event = next_event(read).await;
    assert_eq!(event["event"], name, "unexpected event: {}", event);
    event["data"].clone()
}

/// Assert nothing but keep-alive traffic arrives for `ms` milliseconds.
pub async fn expect_silence(read: &mut WsRead, ms: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(ms);
    loop {
        match tokio::time::timeout_at(deadline, read.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            Ok(other) => panic!("Expected silence, got {:?}", other),
        }
    }
}

/// Close code of the first close frame on the stream.
pub async fn expect_close_code(read: &mut WsRead) -> u16 {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("Timed out waiting for close")
            .expect("Stream ended without close frame")
            .expect("WebSocket error");
        if let Message::Close(Some(frame)) = msg {
            return u16::from(frame.code);
        }
    }
}
