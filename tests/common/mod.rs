//! Shared helpers: start the server in-process on an ephemeral port and
//! talk to it over real WebSockets.

// not every test binary uses every helper
#![allow(dead_code)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use arena_server::config::BattleRules;
use arena_server::state::AppState;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const IDENTITY_HEADER: &str = "x-http-username";

pub fn default_rules() -> BattleRules {
    BattleRules {
        offer_expires_secs: 300,
        starting_hp: 100,
        damage_min: 10,
        damage_max: 20,
    }
}

/// Start the server with the given battle rules and return its ws URL.
/// The TempDir must stay alive for the duration of the test.
pub async fn start_test_server(rules: BattleRules) -> (String, tempfile::TempDir) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = arena_server::db::init_db(&data_dir).expect("Failed to init DB");
    let connections = arena_server::ws::new_connection_registry();

    let state = AppState {
        db,
        connections,
        rules,
        ping_interval_secs: 5,
        pong_timeout_secs: 5,
    };

    let app = arena_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{addr}/"), tmp_dir)
}

/// Connect with an identity header value.
pub async fn connect_as(url: &str, identity: &str) -> WsClient {
    let mut request = url.into_client_request().unwrap();
    request
        .headers_mut()
        .insert(IDENTITY_HEADER, identity.parse().unwrap());
    let (socket, _) = connect_async(request).await.expect("Failed to connect");
    socket
}

/// Connect without any identity header.
pub async fn connect_anonymous(url: &str) -> WsClient {
    let (socket, _) = connect_async(url).await.expect("Failed to connect");
    socket
}

pub async fn send_json(client: &mut WsClient, payload: Value) {
    client
        .send(Message::Text(payload.to_string().into()))
        .await
        .expect("Failed to send");
}

/// Receive the next JSON text frame, skipping keep-alive ping/pong traffic.
pub async fn recv_json(client: &mut WsClient) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timed out waiting for a message")
            .expect("Connection closed")
            .expect("WebSocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).expect("Invalid JSON"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Unexpected frame: {other:?}"),
        }
    }
}

/// Assert that no text frame arrives within the window.
pub async fn assert_silent(client: &mut WsClient, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return;
        }
        match tokio::time::timeout(remaining, client.next()).await {
            Err(_) => return, // window elapsed quietly
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            Ok(other) => panic!("Expected silence, got {other:?}"),
        }
    }
}
