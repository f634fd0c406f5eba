use crate::config::BattleRules;
use crate::db::DbPool;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Active WebSocket connections per identity
    pub connections: ConnectionRegistry,
    /// Battle tuning values (offer expiry, hit points, damage range)
    pub rules: BattleRules,
    /// Keep-alive ping interval in seconds
    pub ping_interval_secs: u64,
    /// Seconds to wait for a pong before closing
    pub pong_timeout_secs: u64,
}
