use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking — no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "-- Migration 1: battle schema

CREATE TABLE battle_users (
    user_id INTEGER PRIMARY KEY,
    created_at TEXT NOT NULL
);

CREATE TABLE battle_offers (
    offer_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (user_id) REFERENCES battle_users(user_id)
        ON UPDATE CASCADE ON DELETE CASCADE
);

CREATE INDEX idx_battle_offers_user ON battle_offers(user_id);

CREATE TABLE battle_accepts (
    accept_id INTEGER PRIMARY KEY AUTOINCREMENT,
    offer_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (offer_id) REFERENCES battle_offers(offer_id)
        ON UPDATE CASCADE ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES battle_users(user_id)
        ON UPDATE CASCADE ON DELETE CASCADE,
    UNIQUE (offer_id, user_id)
);

CREATE INDEX idx_battle_accepts_offer ON battle_accepts(offer_id);

CREATE TABLE battles (
    battle_id INTEGER PRIMARY KEY AUTOINCREMENT,
    accept_id INTEGER NOT NULL UNIQUE,
    status TEXT NOT NULL,
    log TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (accept_id) REFERENCES battle_accepts(accept_id)
        ON UPDATE CASCADE ON DELETE CASCADE
);
",
    )])
}
