//! Fan-out delivery over the connection registry.
//!
//! Senders are unbounded mpsc channels, so pushing a message never blocks:
//! a stuck or closed peer cannot delay delivery to its siblings. A failed
//! send means the receiving actor is gone; it is logged and swallowed,
//! never surfaced to the caller.

use axum::extract::ws::Message;
use serde_json::Value;

use super::ConnectionRegistry;

/// Deliver one payload to every live connection of every listed identity.
/// Identities without connections are skipped. Per-connection send failures
/// do not affect the other connections.
pub fn send_to_users(registry: &ConnectionRegistry, user_ids: &[i64], payload: &Value) {
    let text = payload.to_string();
    let mut delivered = 0usize;

    for &user_id in user_ids {
        // snapshot the senders so a concurrent deregister cannot disturb
        // the fan-out already in flight
        let senders: Vec<_> = match registry.get(&user_id) {
            Some(connections) => connections.value().clone(),
            None => continue,
        };
        for sender in senders {
            if sender
                .send(Message::Text(text.clone().into()))
                .is_err()
            {
                tracing::warn!(user_id, "Dropping message for closed connection");
            } else {
                delivered += 1;
            }
        }
    }

    tracing::debug!(targets = user_ids.len(), delivered, "Fan-out delivery complete");
}

/// Send one payload to a single connection.
pub fn send_to_connection(tx: &super::ConnectionSender, payload: &Value) {
    if tx.send(Message::Text(payload.to_string().into())).is_err() {
        tracing::warn!("Dropping reply for closed connection");
    }
}
