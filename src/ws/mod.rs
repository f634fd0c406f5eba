pub mod actor;
pub mod deliver;
pub mod handler;
pub mod protocol;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Connection registry: tracks all active WebSocket connections per identity.
/// A user can have multiple concurrent connections (multiple devices/tabs).
/// Arc<DashMap<user_id, Vec<ConnectionSender>>>
pub type ConnectionRegistry = Arc<DashMap<i64, Vec<ConnectionSender>>>;

/// Create a new empty connection registry. Constructed once in main and
/// passed explicitly through AppState — no process-wide global.
pub fn new_connection_registry() -> ConnectionRegistry {
    Arc::new(DashMap::new())
}
