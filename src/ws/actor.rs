use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::state::AppState;
use crate::ws::protocol;
use crate::ws::ConnectionSender;

/// Run the actor-per-connection pattern for an identity-bound WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader task: processes incoming messages, dispatches to protocol handlers
///
/// The mpsc channel allows any part of the system (in particular battle
/// fan-out) to push messages to this client by cloning the sender.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: i64) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Register this connection in the connection registry
    register_connection(&state, user_id, tx.clone());

    tracing::info!(user_id, "WebSocket actor started");

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses.
    // Prevents connection leaks from abrupt disconnects.
    let ping_interval = Duration::from_secs(state.ping_interval_secs);
    let pong_timeout = Duration::from_secs(state.pong_timeout_secs);
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(ping_interval);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            // Send ping
            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died — connection is gone
                break;
            }

            // Wait for pong within timeout
            match timeout(pong_timeout, pong_rx.recv()).await {
                Ok(Some(())) => {
                    // Pong received, continue
                }
                _ => {
                    // Pong timeout or channel closed — close connection
                    tracing::warn!(user_id, "Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: process incoming WebSocket messages
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(&text, &tx, &state, user_id).await;
                }
                Message::Binary(_) => {
                    // The protocol is JSON text frames
                    tracing::debug!(user_id, "Received unexpected binary message");
                }
                Message::Pong(_) => {
                    // Pong received — notify the ping task
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    // Respond to client pings with pong
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(user_id, reason = ?frame, "Client initiated close");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(user_id, error = %e, "WebSocket receive error");
                break;
            }
            None => {
                // Stream ended — client disconnected
                tracing::info!(user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: abort writer and ping tasks
    writer_handle.abort();
    ping_handle.abort();

    // Remove this connection from the registry
    unregister_connection(&state, user_id, &tx);

    tracing::info!(user_id, "WebSocket actor stopped");
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}

/// Register a connection sender in the connection registry.
/// Idempotent: a sender already present for this identity is not added twice.
fn register_connection(state: &AppState, user_id: i64, tx: ConnectionSender) {
    let mut connections = state.connections.entry(user_id).or_default();
    if !connections.iter().any(|sender| sender.same_channel(&tx)) {
        connections.push(tx);
    }

    let conn_count = connections.len();
    drop(connections);
    tracing::debug!(user_id, connections = conn_count, "Connection registered");
}

/// Remove this connection (and any other closed senders) from the registry.
/// The identity's entry disappears entirely once its last connection is gone,
/// so no memory is retained for offline users.
fn unregister_connection(state: &AppState, user_id: i64, tx: &ConnectionSender) {
    let mut remove_user = false;

    match state.connections.get_mut(&user_id) {
        Some(mut connections) => {
            connections.retain(|sender| !sender.same_channel(tx) && !sender.is_closed());
            if connections.is_empty() {
                remove_user = true;
            }
        }
        None => {
            // deregister for an identity we never saw: anomalous but not fatal
            tracing::error!(user_id, "Deregistering connection for unknown identity");
            return;
        }
    }

    if remove_user {
        state.connections.remove(&user_id);
    }

    tracing::debug!(user_id, "Connection unregistered");
}
