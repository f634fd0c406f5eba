//! Inbound message decoding and action dispatch.
//!
//! The wire envelope is JSON: `{ "action": string, "payload": object|array }`.
//! Actions map to battle operations through a closed enum; unknown action
//! names get a structured "Unexpected action" reply instead of a crash.
//! No failure here is fatal to the session — every error path answers the
//! origin connection and keeps the socket open.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::battle::log::BattleMove;
use crate::battle::service::{
    self, AcceptPayload, CreatePayload, Outbound, ServiceError, StartPayload,
};
use crate::state::AppState;
use crate::ws::deliver::{send_to_connection, send_to_users};
use crate::ws::ConnectionSender;

/// The outer request envelope.
#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

/// Closed set of recognized actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Create,
    List,
    Accept,
    Start,
    Move,
}

impl Action {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "battles_create" => Some(Action::Create),
            "battles_list" => Some(Action::List),
            "battles_accept" => Some(Action::Accept),
            "battles_start" => Some(Action::Start),
            "battles_move" => Some(Action::Move),
            _ => None,
        }
    }
}

/// A fully decoded request, ready to run against the store.
enum Request {
    Create(CreatePayload),
    List,
    Accept(AcceptPayload),
    Start(StartPayload),
    Move(BattleMove),
}

/// Handle one inbound text frame from an authenticated connection.
pub async fn handle_text_message(
    text: &str,
    tx: &ConnectionSender,
    state: &AppState,
    user_id: i64,
) {
    let message: IncomingMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(user_id, error = %e, "Malformed message envelope");
            send_validation_error(tx, &e);
            return;
        }
    };

    let action = match Action::parse(&message.action) {
        Some(action) => action,
        None => {
            tracing::warn!(user_id, action = %message.action, "Unexpected action");
            send_to_connection(
                tx,
                &json!({
                    "error": "Unexpected action",
                    "payload": { "action": message.action },
                }),
            );
            return;
        }
    };

    let request = match decode_request(action, message.payload) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(user_id, ?action, error = %e, "Invalid action payload");
            send_validation_error(tx, &e);
            return;
        }
    };

    // rusqlite is synchronous: run the whole operation on the blocking pool,
    // holding the connection mutex across the read-modify-write so racing
    // moves on the same battle serialize.
    let db = state.db.clone();
    let rules = state.rules;
    let result = tokio::task::spawn_blocking(move || {
        let mut conn = db
            .lock()
            .map_err(|_| ServiceError::Internal("database lock poisoned".to_string()))?;
        match request {
            Request::Create(payload) => service::create_offer(&mut conn, &payload),
            Request::List => service::list_offers(&mut conn, &rules),
            Request::Accept(payload) => service::accept_offer(&mut conn, &rules, &payload),
            Request::Start(payload) => service::start_battle(&mut conn, &payload),
            Request::Move(mv) => service::submit_move(&mut conn, &rules, &mv),
        }
    })
    .await;

    match result {
        Ok(Ok(outbound)) => {
            for message in outbound {
                match message {
                    Outbound::Reply(payload) => send_to_connection(tx, &payload),
                    Outbound::Deliver { user_ids, payload } => {
                        send_to_users(&state.connections, &user_ids, &payload);
                    }
                }
            }
        }
        Ok(Err(ServiceError::Reject { error, payload })) => {
            tracing::debug!(user_id, error = %error, "Battle action rejected");
            send_to_connection(tx, &json!({ "error": error, "payload": payload }));
        }
        Ok(Err(ServiceError::Internal(message))) => {
            tracing::error!(user_id, error = %message, "Battle action failed");
            send_unexpected_error(tx, &message);
        }
        Err(e) => {
            tracing::error!(user_id, error = %e, "Battle action task panicked");
            send_unexpected_error(tx, &e.to_string());
        }
    }
}

fn decode_request(action: Action, payload: Value) -> Result<Request, serde_json::Error> {
    Ok(match action {
        Action::Create => Request::Create(serde_json::from_value(payload)?),
        Action::List => Request::List,
        Action::Accept => Request::Accept(serde_json::from_value(payload)?),
        Action::Start => Request::Start(serde_json::from_value(payload)?),
        Action::Move => Request::Move(serde_json::from_value(payload)?),
    })
}

fn send_validation_error(tx: &ConnectionSender, e: &serde_json::Error) {
    send_to_connection(
        tx,
        &json!({
            "error": "validationError",
            "payload": { "message": e.to_string() },
        }),
    );
}

fn send_unexpected_error(tx: &ConnectionSender, message: &str) {
    send_to_connection(
        tx,
        &json!({
            "error": "unexpectedError",
            "payload": { "message": message },
        }),
    );
}
