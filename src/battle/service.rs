//! Match coordination: the five battle operations over the SQLite store.
//!
//! Every operation runs inside one rusqlite transaction on the shared
//! connection. Success commits exactly once; any rejection or error drops
//! the transaction, which rolls back, so no partial state is observable.
//! The caller holds the connection mutex for the whole read-modify-write,
//! which serializes racing moves on the same battle: two moves can never
//! both observe "round not yet complete" and both trigger resolution.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::BattleRules;
use crate::db::models::{BattleAccept, BattleOffer, BattleRow, BattleUser};

use super::log::{BattleLog, BattleMove, BattleStatus};

/// Where an outbound payload goes.
#[derive(Debug)]
pub enum Outbound {
    /// Reply only to the connection that submitted the action.
    Reply(Value),
    /// Fan out to every live connection of the listed identities.
    Deliver { user_ids: Vec<i64>, payload: Value },
}

/// Failure of a battle operation.
#[derive(Debug)]
pub enum ServiceError {
    /// Business-rule rejection, reported to the origin connection only.
    Reject { error: String, payload: Value },
    /// Storage or programming failure, reported as a generic error.
    Internal(String),
}

impl ServiceError {
    fn reject(error: &str, payload: Value) -> Self {
        ServiceError::Reject {
            error: error.to_string(),
            payload,
        }
    }
}

impl From<rusqlite::Error> for ServiceError {
    fn from(e: rusqlite::Error) -> Self {
        ServiceError::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        ServiceError::Internal(e.to_string())
    }
}

type ServiceResult = Result<Vec<Outbound>, ServiceError>;

/// `battles_create` payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePayload {
    pub user_id: i64,
}

/// `battles_accept` payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptPayload {
    pub user_id: i64,
    pub offer_id: i64,
}

/// `battles_start` payload. Clients also send the offerId; it is implied by
/// the accept and ignored here.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    pub accept_id: i64,
}

/// Explicit two-step get-or-create for an identity: lookup, then insert if
/// absent. Returns the resolved user row either way.
fn get_or_create_user(tx: &Transaction, user_id: i64) -> rusqlite::Result<BattleUser> {
    let existing = tx
        .query_row(
            "SELECT user_id, created_at FROM battle_users WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(BattleUser {
                    user_id: row.get(0)?,
                    created_at: row.get(1)?,
                })
            },
        )
        .optional()?;

    if let Some(user) = existing {
        return Ok(user);
    }

    let created_at = Utc::now();
    tx.execute(
        "INSERT INTO battle_users (user_id, created_at) VALUES (?1, ?2)",
        params![user_id, created_at],
    )?;
    tracing::debug!(user_id, "Created battle user");
    Ok(BattleUser { user_id, created_at })
}

fn load_offer(tx: &Transaction, offer_id: i64) -> rusqlite::Result<Option<BattleOffer>> {
    tx.query_row(
        "SELECT offer_id, user_id, created_at FROM battle_offers WHERE offer_id = ?1",
        params![offer_id],
        |row| {
            Ok(BattleOffer {
                offer_id: row.get(0)?,
                user_id: row.get(1)?,
                created_at: row.get(2)?,
            })
        },
    )
    .optional()
}

/// Create a new battle offer for the given identity.
pub fn create_offer(conn: &mut Connection, payload: &CreatePayload) -> ServiceResult {
    let tx = conn.transaction()?;
    let user_id = get_or_create_user(&tx, payload.user_id)?.user_id;

    tx.execute(
        "INSERT INTO battle_offers (user_id, created_at) VALUES (?1, ?2)",
        params![user_id, Utc::now()],
    )?;
    let offer_id = tx.last_insert_rowid();
    tx.commit()?;

    tracing::info!(user_id, offer_id, "Battle offer created");
    Ok(vec![Outbound::Reply(json!({
        "userId": user_id,
        "offerId": offer_id,
    }))])
}

/// List all offers still inside the expiry window. Empty array when none.
pub fn list_offers(conn: &mut Connection, rules: &BattleRules) -> ServiceResult {
    let now = Utc::now();
    let mut stmt =
        conn.prepare("SELECT offer_id, user_id, created_at FROM battle_offers")?;
    let offers: Vec<Value> = stmt
        .query_map([], |row| {
            Ok(BattleOffer {
                offer_id: row.get(0)?,
                user_id: row.get(1)?,
                created_at: row.get::<_, DateTime<Utc>>(2)?,
            })
        })?
        .filter_map(|r| r.ok())
        .filter(|offer| offer.is_active(now, rules.offer_expires_secs))
        .map(|offer| json!({ "userId": offer.user_id, "offerId": offer.offer_id }))
        .collect();

    Ok(vec![Outbound::Reply(Value::Array(offers))])
}

/// Accept an open offer. Self-accepts, expired offers and duplicate
/// (offer, user) pairs are rejected.
pub fn accept_offer(
    conn: &mut Connection,
    rules: &BattleRules,
    payload: &AcceptPayload,
) -> ServiceResult {
    let tx = conn.transaction()?;

    let offer = match load_offer(&tx, payload.offer_id)? {
        None => {
            return Err(ServiceError::reject(
                "Battle offer does not exist",
                json!({ "offerId": payload.offer_id }),
            ))
        }
        Some(offer) => offer,
    };
    if offer.user_id == payload.user_id || !offer.is_active(Utc::now(), rules.offer_expires_secs) {
        return Err(ServiceError::reject(
            "Invalid battle offer",
            json!({ "offerId": payload.offer_id }),
        ));
    }

    let existing: Option<i64> = tx
        .query_row(
            "SELECT accept_id FROM battle_accepts WHERE offer_id = ?1 AND user_id = ?2",
            params![payload.offer_id, payload.user_id],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Err(ServiceError::reject(
            "You already accepted this battle",
            json!({ "offerId": payload.offer_id }),
        ));
    }

    let user_id = get_or_create_user(&tx, payload.user_id)?.user_id;
    tx.execute(
        "INSERT INTO battle_accepts (offer_id, user_id, created_at) VALUES (?1, ?2, ?3)",
        params![payload.offer_id, user_id, Utc::now()],
    )?;
    let accept_id = tx.last_insert_rowid();
    tx.commit()?;

    tracing::info!(user_id, offer_id = payload.offer_id, accept_id, "Battle offer accepted");
    Ok(vec![Outbound::Reply(json!({
        "offerId": payload.offer_id,
        "acceptId": accept_id,
    }))])
}

/// Start the battle for an accept. At most one battle per accept; both
/// participants get the identical start payload.
pub fn start_battle(conn: &mut Connection, payload: &StartPayload) -> ServiceResult {
    let tx = conn.transaction()?;

    let accept: Option<BattleAccept> = tx
        .query_row(
            "SELECT accept_id, offer_id, user_id, created_at FROM battle_accepts \
             WHERE accept_id = ?1",
            params![payload.accept_id],
            |row| {
                Ok(BattleAccept {
                    accept_id: row.get(0)?,
                    offer_id: row.get(1)?,
                    user_id: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?;
    let accept = match accept {
        None => {
            return Err(ServiceError::reject(
                "Battle offer accept does not exist",
                json!({ "acceptId": payload.accept_id }),
            ))
        }
        Some(accept) => accept,
    };

    let taken: Option<i64> = tx
        .query_row(
            "SELECT battle_id FROM battles WHERE accept_id = ?1",
            params![payload.accept_id],
            |row| row.get(0),
        )
        .optional()?;
    if taken.is_some() {
        return Err(ServiceError::reject(
            "Battle has already been taken",
            json!({ "acceptId": payload.accept_id }),
        ));
    }

    let creator: i64 = tx.query_row(
        "SELECT user_id FROM battle_offers WHERE offer_id = ?1",
        params![accept.offer_id],
        |row| row.get(0),
    )?;
    let acceptor = accept.user_id;

    let log = BattleLog::new(creator, acceptor);
    tx.execute(
        "INSERT INTO battles (accept_id, status, log, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            payload.accept_id,
            BattleStatus::Active.as_str(),
            serde_json::to_string(&log)?,
            Utc::now(),
        ],
    )?;
    let battle_id = tx.last_insert_rowid();
    tx.commit()?;

    tracing::info!(battle_id, creator, acceptor, "Battle started");
    Ok(vec![Outbound::Deliver {
        user_ids: vec![creator, acceptor],
        payload: json!({ "battleId": battle_id }),
    }])
}

/// Accept one move. A partial round commits silently; a filled round is
/// resolved and announced to both participants, and a finished battle
/// additionally gets the full summary.
pub fn submit_move(conn: &mut Connection, rules: &BattleRules, mv: &BattleMove) -> ServiceResult {
    let tx = conn.transaction()?;

    let battle: Option<BattleRow> = tx
        .query_row(
            "SELECT battle_id, accept_id, status, log, created_at FROM battles \
             WHERE battle_id = ?1",
            params![mv.battle_id],
            |row| {
                Ok(BattleRow {
                    battle_id: row.get(0)?,
                    accept_id: row.get(1)?,
                    status: row.get(2)?,
                    log: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )
        .optional()?;
    let battle = match battle {
        None => {
            return Err(ServiceError::reject(
                "Battle does not exist",
                json!({ "battleId": mv.battle_id }),
            ))
        }
        Some(battle) => battle,
    };

    let status = BattleStatus::parse(&battle.status).ok_or_else(|| {
        ServiceError::Internal(format!("invalid battle status: {}", battle.status))
    })?;
    let mut log: BattleLog = serde_json::from_str(&battle.log)?;

    if let Err(rejection) = log.validate_move(status, mv) {
        return Err(ServiceError::reject(
            rejection.message(),
            json!({ "battleId": mv.battle_id, "round": mv.round }),
        ));
    }

    log.apply_move(mv);

    let mut outbound = Vec::new();
    let mut status = status;
    if log.is_round_complete() {
        let resolved_round = log.current_round;
        log.resolve_round(rules.damage_min, rules.damage_max);
        status = log.resolve_outcome(rules.starting_hp);

        let participants = log.participants().to_vec();
        if let Some(round_payload) = log.round_summary(resolved_round) {
            outbound.push(Outbound::Deliver {
                user_ids: participants.clone(),
                payload: round_payload,
            });
        }
        if status == BattleStatus::Finished {
            tracing::info!(
                battle_id = mv.battle_id,
                winner = log.winner,
                "Battle finished"
            );
            outbound.push(Outbound::Deliver {
                user_ids: participants,
                payload: log.battle_summary(),
            });
        }
    }

    tx.execute(
        "UPDATE battles SET status = ?1, log = ?2 WHERE battle_id = ?3",
        params![status.as_str(), serde_json::to_string(&log)?, mv.battle_id],
    )?;
    tx.commit()?;

    Ok(outbound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::log::Choice;
    use crate::db::migrations::migrations;

    fn test_conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        migrations().to_latest(&mut conn).unwrap();
        conn
    }

    fn rules() -> BattleRules {
        BattleRules {
            offer_expires_secs: 300,
            starting_hp: 100,
            damage_min: 10,
            damage_max: 20,
        }
    }

    fn reply(outbound: &[Outbound]) -> &Value {
        match outbound {
            [Outbound::Reply(value)] => value,
            other => panic!("expected single reply, got {other:?}"),
        }
    }

    fn assert_reject(result: ServiceResult, expected: &str) {
        match result {
            Err(ServiceError::Reject { error, .. }) => assert_eq!(error, expected),
            other => panic!("expected rejection {expected:?}, got {other:?}"),
        }
    }

    /// offer by creator, accept by acceptor, battle started; returns battle_id
    fn start_fixture(conn: &mut Connection, creator: i64, acceptor: i64) -> i64 {
        let offer = reply(&create_offer(conn, &CreatePayload { user_id: creator }).unwrap())
            ["offerId"]
            .as_i64()
            .unwrap();
        let accept = reply(
            &accept_offer(
                conn,
                &rules(),
                &AcceptPayload {
                    user_id: acceptor,
                    offer_id: offer,
                },
            )
            .unwrap(),
        )["acceptId"]
            .as_i64()
            .unwrap();
        let outbound = start_battle(conn, &StartPayload { accept_id: accept }).unwrap();
        match outbound.as_slice() {
            [Outbound::Deliver { user_ids, payload }] => {
                assert_eq!(user_ids, &[creator, acceptor]);
                payload["battleId"].as_i64().unwrap()
            }
            other => panic!("expected start delivery, got {other:?}"),
        }
    }

    fn mv(user_id: i64, battle_id: i64, round: u32, choice: Choice) -> BattleMove {
        BattleMove {
            user_id,
            battle_id,
            round,
            choice,
        }
    }

    #[test]
    fn create_offer_replies_with_ids() {
        let mut conn = test_conn();
        let outbound = create_offer(&mut conn, &CreatePayload { user_id: 7 }).unwrap();
        let value = reply(&outbound);
        assert_eq!(value["userId"], 7);
        assert!(value["offerId"].as_i64().unwrap() > 0);
    }

    #[test]
    fn list_offers_empty_is_empty_array() {
        let mut conn = test_conn();
        let outbound = list_offers(&mut conn, &rules()).unwrap();
        assert_eq!(reply(&outbound), &json!([]));
    }

    #[test]
    fn list_offers_excludes_expired() {
        let mut conn = test_conn();
        create_offer(&mut conn, &CreatePayload { user_id: 1 }).unwrap();
        // age the offer past the window
        conn.execute(
            "UPDATE battle_offers SET created_at = ?1",
            params![Utc::now() - chrono::Duration::seconds(301)],
        )
        .unwrap();
        create_offer(&mut conn, &CreatePayload { user_id: 2 }).unwrap();

        let outbound = list_offers(&mut conn, &rules()).unwrap();
        let offers = reply(&outbound).as_array().unwrap().clone();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0]["userId"], 2);
    }

    #[test]
    fn self_accept_is_rejected() {
        let mut conn = test_conn();
        let offer = reply(&create_offer(&mut conn, &CreatePayload { user_id: 1 }).unwrap())
            ["offerId"]
            .as_i64()
            .unwrap();
        assert_reject(
            accept_offer(
                &mut conn,
                &rules(),
                &AcceptPayload {
                    user_id: 1,
                    offer_id: offer,
                },
            ),
            "Invalid battle offer",
        );
        // no accept row was created
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM battle_accepts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn expired_offer_is_rejected() {
        let mut conn = test_conn();
        let offer = reply(&create_offer(&mut conn, &CreatePayload { user_id: 1 }).unwrap())
            ["offerId"]
            .as_i64()
            .unwrap();
        conn.execute(
            "UPDATE battle_offers SET created_at = ?1",
            params![Utc::now() - chrono::Duration::seconds(400)],
        )
        .unwrap();
        assert_reject(
            accept_offer(
                &mut conn,
                &rules(),
                &AcceptPayload {
                    user_id: 2,
                    offer_id: offer,
                },
            ),
            "Invalid battle offer",
        );
    }

    #[test]
    fn unknown_offer_is_rejected() {
        let mut conn = test_conn();
        assert_reject(
            accept_offer(
                &mut conn,
                &rules(),
                &AcceptPayload {
                    user_id: 2,
                    offer_id: 999,
                },
            ),
            "Battle offer does not exist",
        );
    }

    #[test]
    fn second_accept_by_same_user_is_rejected() {
        let mut conn = test_conn();
        let offer = reply(&create_offer(&mut conn, &CreatePayload { user_id: 1 }).unwrap())
            ["offerId"]
            .as_i64()
            .unwrap();
        let payload = AcceptPayload {
            user_id: 2,
            offer_id: offer,
        };
        accept_offer(&mut conn, &rules(), &payload).unwrap();
        assert_reject(
            accept_offer(&mut conn, &rules(), &payload),
            "You already accepted this battle",
        );
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM battle_accepts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn different_users_may_accept_the_same_offer() {
        let mut conn = test_conn();
        let offer = reply(&create_offer(&mut conn, &CreatePayload { user_id: 1 }).unwrap())
            ["offerId"]
            .as_i64()
            .unwrap();
        for user_id in [2, 3] {
            accept_offer(
                &mut conn,
                &rules(),
                &AcceptPayload {
                    user_id,
                    offer_id: offer,
                },
            )
            .unwrap();
        }
    }

    #[test]
    fn battle_starts_once_per_accept() {
        let mut conn = test_conn();
        let battle_id = start_fixture(&mut conn, 1, 2);
        assert!(battle_id > 0);

        let accept_id: i64 = conn
            .query_row("SELECT accept_id FROM battles WHERE battle_id = ?1", params![battle_id], |r| {
                r.get(0)
            })
            .unwrap();
        assert_reject(
            start_battle(&mut conn, &StartPayload { accept_id }),
            "Battle has already been taken",
        );
    }

    #[test]
    fn unknown_accept_is_rejected() {
        let mut conn = test_conn();
        assert_reject(
            start_battle(&mut conn, &StartPayload { accept_id: 5 }),
            "Battle offer accept does not exist",
        );
    }

    #[test]
    fn partial_round_is_silent() {
        let mut conn = test_conn();
        let battle_id = start_fixture(&mut conn, 1, 2);
        let outbound = submit_move(&mut conn, &rules(), &mv(1, battle_id, 0, Choice::Rock)).unwrap();
        assert!(outbound.is_empty());
    }

    #[test]
    fn move_validation_rejections_surface() {
        let mut conn = test_conn();
        let battle_id = start_fixture(&mut conn, 1, 2);

        assert_reject(
            submit_move(&mut conn, &rules(), &mv(9, battle_id, 0, Choice::Rock)),
            "You have no access to this battle",
        );
        assert_reject(
            submit_move(&mut conn, &rules(), &mv(1, battle_id, 3, Choice::Rock)),
            "Wrong round or move already made",
        );
        assert_reject(
            submit_move(&mut conn, &rules(), &mv(1, 999, 0, Choice::Rock)),
            "Battle does not exist",
        );

        submit_move(&mut conn, &rules(), &mv(1, battle_id, 0, Choice::Rock)).unwrap();
        assert_reject(
            submit_move(&mut conn, &rules(), &mv(1, battle_id, 0, Choice::Paper)),
            "Wrong round or move already made",
        );
    }

    #[test]
    fn completed_round_is_announced_to_both() {
        let mut conn = test_conn();
        let battle_id = start_fixture(&mut conn, 1, 2);
        submit_move(&mut conn, &rules(), &mv(1, battle_id, 0, Choice::Rock)).unwrap();
        let outbound =
            submit_move(&mut conn, &rules(), &mv(2, battle_id, 0, Choice::Scissors)).unwrap();

        match outbound.as_slice() {
            [Outbound::Deliver { user_ids, payload }] => {
                assert_eq!(user_ids, &[1, 2]);
                assert_eq!(payload["roundId"], 0);
                assert_eq!(payload["roundWinner"]["userId"], 1);
            }
            other => panic!("expected round delivery, got {other:?}"),
        }
    }

    #[test]
    fn decisive_battle_runs_to_summary() {
        let mut conn = test_conn();
        let battle_id = start_fixture(&mut conn, 1, 2);

        let mut summary = None;
        for round in 0..10u32 {
            submit_move(&mut conn, &rules(), &mv(1, battle_id, round, Choice::Rock)).unwrap();
            let outbound =
                submit_move(&mut conn, &rules(), &mv(2, battle_id, round, Choice::Scissors))
                    .unwrap();
            if outbound.len() == 2 {
                match &outbound[1] {
                    Outbound::Deliver { user_ids, payload } => {
                        assert_eq!(user_ids, &[1, 2]);
                        summary = Some(payload.clone());
                    }
                    other => panic!("expected summary delivery, got {other:?}"),
                }
                break;
            }
        }

        let summary = summary.expect("battle should finish within 10 max-damage-20 rounds");
        assert_eq!(summary["winner"]["userId"], 1);
        let round_count = summary["roundCount"].as_u64().unwrap();
        assert!((5..=10).contains(&round_count));

        // further moves are rejected: the battle is over
        assert_reject(
            submit_move(
                &mut conn,
                &rules(),
                &mv(1, battle_id, round_count as u32, Choice::Rock),
            ),
            "Battle is already over",
        );
    }
}
