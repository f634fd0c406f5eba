use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::Response,
};
use serde_json::json;

use crate::state::AppState;
use crate::ws::actor;

/// Header carrying the numeric identity of the connecting user.
pub const USERNAME_HEADER: &str = "x-http-username";

/// 1008 = policy violation: the connection failed identity binding.
const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// GET /
/// WebSocket upgrade endpoint. The client must present a positive integer
/// identity in the username header; otherwise the socket is sent a one-shot
/// error payload and closed immediately. No further messages are processed.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    match parse_identity(&headers) {
        Some(user_id) => {
            tracing::info!(user_id, "WebSocket connection bound to identity");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, user_id))
        }
        None => {
            tracing::warn!("WebSocket connection without a valid identity header");
            ws.on_upgrade(reject_unbound)
        }
    }
}

/// Extract the identity from the username header. Absent, non-numeric or
/// non-positive values all fail the binding.
fn parse_identity(headers: &HeaderMap) -> Option<i64> {
    let user_id: i64 = headers.get(USERNAME_HEADER)?.to_str().ok()?.parse().ok()?;
    (user_id > 0).then_some(user_id)
}

/// Send the one-shot error payload, then close with a policy violation.
async fn reject_unbound(mut socket: WebSocket) {
    let error = json!({
        "error": "Invalid username. Username must be a positive integer",
    });
    let _ = socket.send(Message::Text(error.to_string().into())).await;
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY_VIOLATION,
            reason: "Policy violation".into(),
        })))
        .await;
}
