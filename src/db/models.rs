//! Database row types for all tables.
//! These correspond 1:1 to the SQLite schema defined in migrations.rs.

use chrono::{DateTime, Duration, Utc};

/// Participant record in the battle_users table.
/// user_id is the client-supplied positive integer identity; rows are
/// created lazily the first time an identity appears in a battle action.
#[derive(Debug, Clone)]
pub struct BattleUser {
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Open request for a battle in the battle_offers table.
#[derive(Debug, Clone)]
pub struct BattleOffer {
    pub offer_id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

impl BattleOffer {
    /// An offer is active while it is younger than the expiry window.
    /// Pure function of created_at and the clock, not a stored flag.
    pub fn is_active(&self, now: DateTime<Utc>, offer_expires_secs: i64) -> bool {
        self.created_at > now - Duration::seconds(offer_expires_secs)
    }
}

/// One identity's commitment to an offer, unique per (offer_id, user_id).
#[derive(Debug, Clone)]
pub struct BattleAccept {
    pub accept_id: i64,
    pub offer_id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Battle row. `log` holds the serialized BattleLog aggregate; domain code
/// deserializes it at the persistence boundary and never inspects raw JSON.
#[derive(Debug, Clone)]
pub struct BattleRow {
    pub battle_id: i64,
    pub accept_id: i64,
    pub status: String,
    pub log: String,
    pub created_at: DateTime<Utc>,
}
