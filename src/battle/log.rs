//! Typed battle state and the pure round/outcome logic over it.
//!
//! The `log` column of the battles table is the serialized [`BattleLog`]
//! aggregate. All domain decisions are made against the typed structure;
//! JSON only appears at the persistence boundary and in outbound payloads.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Battle lifecycle status. One-way: Active → Finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BattleStatus {
    Active,
    Finished,
}

impl BattleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BattleStatus::Active => "ACTIVE",
            BattleStatus::Finished => "FINISHED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(BattleStatus::Active),
            "FINISHED" => Some(BattleStatus::Finished),
            _ => None,
        }
    }
}

/// Rock-paper-scissors choice. Wire format is the integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Choice {
    Rock,
    Paper,
    Scissors,
}

impl Choice {
    /// Standard beats relation: rock > scissors > paper > rock.
    pub fn beats(self, other: Choice) -> bool {
        matches!(
            (self, other),
            (Choice::Rock, Choice::Scissors)
                | (Choice::Scissors, Choice::Paper)
                | (Choice::Paper, Choice::Rock)
        )
    }
}

impl From<Choice> for u8 {
    fn from(choice: Choice) -> u8 {
        match choice {
            Choice::Rock => 0,
            Choice::Paper => 1,
            Choice::Scissors => 2,
        }
    }
}

impl TryFrom<u8> for Choice {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Choice::Rock),
            1 => Ok(Choice::Paper),
            2 => Ok(Choice::Scissors),
            other => Err(format!("invalid choice: {other}")),
        }
    }
}

/// A move submitted by a participant, as received on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleMove {
    pub user_id: i64,
    pub battle_id: i64,
    pub round: u32,
    pub choice: Choice,
}

/// One recorded answer within a round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub user_id: i64,
    pub choice: Choice,
}

/// One exchange of simultaneous moves. `round_winner = None` with two
/// answers recorded encodes a tie: no damage, round still counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoundRecord {
    pub answers: Vec<Answer>,
    pub round_winner: Option<i64>,
    pub round_damage: Option<i64>,
}

/// Why a submitted move was not accepted. Terminal per move, never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveRejection {
    /// Submitting identity is not one of the battle's two participants.
    NoAccess,
    /// Battle status is no longer ACTIVE.
    AlreadyOver,
    /// Move targets a round other than the current one, or the identity
    /// already answered this round.
    WrongRound,
}

impl MoveRejection {
    pub fn message(self) -> &'static str {
        match self {
            MoveRejection::NoAccess => "You have no access to this battle",
            MoveRejection::AlreadyOver => "Battle is already over",
            MoveRejection::WrongRound => "Wrong round or move already made",
        }
    }
}

/// The authoritative mutable state of one battle. Exactly two participants,
/// fixed at creation; `current_round` always keys an existing round record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleLog {
    pub creator: i64,
    pub acceptor: i64,
    pub current_round: u32,
    pub rounds: BTreeMap<u32, RoundRecord>,
    pub winner: Option<i64>,
}

impl BattleLog {
    /// Fresh log for a newly started battle: round 0 exists and is empty.
    pub fn new(creator: i64, acceptor: i64) -> Self {
        let mut rounds = BTreeMap::new();
        rounds.insert(0, RoundRecord::default());
        Self {
            creator,
            acceptor,
            current_round: 0,
            rounds,
            winner: None,
        }
    }

    pub fn participants(&self) -> [i64; 2] {
        [self.creator, self.acceptor]
    }

    fn is_participant(&self, user_id: i64) -> bool {
        user_id == self.creator || user_id == self.acceptor
    }

    /// Check a submitted move against the battle state.
    pub fn validate_move(
        &self,
        status: BattleStatus,
        mv: &BattleMove,
    ) -> Result<(), MoveRejection> {
        if !self.is_participant(mv.user_id) {
            return Err(MoveRejection::NoAccess);
        }
        if status != BattleStatus::Active {
            return Err(MoveRejection::AlreadyOver);
        }
        if mv.round != self.current_round {
            return Err(MoveRejection::WrongRound);
        }
        let already_answered = self
            .rounds
            .get(&self.current_round)
            .map(|round| round.answers.iter().any(|a| a.user_id == mv.user_id))
            .unwrap_or(false);
        if already_answered {
            return Err(MoveRejection::WrongRound);
        }
        Ok(())
    }

    /// Record an answer in the current round. Precondition: the move passed
    /// [`validate_move`]. The round record is created if absent (normally it
    /// is pre-created by the previous outcome resolution).
    pub fn apply_move(&mut self, mv: &BattleMove) {
        let round = self.rounds.entry(self.current_round).or_default();
        round.answers.push(Answer {
            user_id: mv.user_id,
            choice: mv.choice,
        });
    }

    /// True once both participants answered the current round.
    pub fn is_round_complete(&self) -> bool {
        self.rounds
            .get(&self.current_round)
            .map(|round| round.answers.len() == 2)
            .unwrap_or(false)
    }

    /// Resolve the current round. Call only when [`is_round_complete`].
    /// Equal choices tie: no winner, no damage. A decisive pair sets the
    /// winner and draws damage uniformly from the inclusive range.
    pub fn resolve_round(&mut self, damage_min: i64, damage_max: i64) {
        let Some(round) = self.rounds.get_mut(&self.current_round) else {
            return;
        };
        let [first, second] = match round.answers.as_slice() {
            [a, b] => [a.clone(), b.clone()],
            _ => return,
        };
        if first.choice == second.choice {
            // tie round: counts, deals nothing
            round.round_winner = None;
            round.round_damage = None;
            return;
        }
        let winner = if first.choice.beats(second.choice) {
            first.user_id
        } else {
            second.user_id
        };
        round.round_winner = Some(winner);
        round.round_damage = Some(rand::rng().random_range(damage_min..=damage_max));
    }

    /// Remaining hit points for (creator, acceptor), replayed from round 0.
    /// Incomplete and tie rounds contribute no damage. The full replay keeps
    /// the outcome a pure function of the round log.
    pub fn hit_points(&self, starting_hp: i64) -> (i64, i64) {
        let mut creator_hp = starting_hp;
        let mut acceptor_hp = starting_hp;
        for round in self.rounds.values() {
            let (Some(winner), Some(damage)) = (round.round_winner, round.round_damage) else {
                continue;
            };
            if winner == self.creator {
                acceptor_hp -= damage;
            } else {
                creator_hp -= damage;
            }
        }
        (creator_hp, acceptor_hp)
    }

    /// Resolve the battle outcome after a round resolution. Either finishes
    /// the battle (a participant dropped to 0 hp) or advances to a fresh
    /// round. Idempotent on an unchanged log: the counter only advances when
    /// the current round has been fully answered, so a repeat call finds the
    /// freshly appended empty round and does nothing.
    pub fn resolve_outcome(&mut self, starting_hp: i64) -> BattleStatus {
        if self.winner.is_some() {
            return BattleStatus::Finished;
        }
        let (creator_hp, acceptor_hp) = self.hit_points(starting_hp);
        if creator_hp <= 0 {
            self.winner = Some(self.acceptor);
            return BattleStatus::Finished;
        }
        if acceptor_hp <= 0 {
            self.winner = Some(self.creator);
            return BattleStatus::Finished;
        }
        if self.is_round_complete() {
            self.current_round += 1;
            self.rounds.insert(self.current_round, RoundRecord::default());
        }
        BattleStatus::Active
    }

    /// Outbound payload for one resolved round.
    pub fn round_summary(&self, round_id: u32) -> Option<Value> {
        let round = self.rounds.get(&round_id)?;
        let answers: Vec<Value> = round
            .answers
            .iter()
            .map(|a| json!({ "userId": a.user_id, "choice": a.choice }))
            .collect();
        Some(json!({
            "roundId": round_id,
            "roundWinner": { "userId": round.round_winner },
            "roundDamage": round.round_damage,
            "answers": answers,
        }))
    }

    /// Outbound payload for a finished battle: winner plus every round.
    pub fn battle_summary(&self) -> Value {
        let rounds: Vec<Value> = self
            .rounds
            .keys()
            .filter_map(|&round_id| self.round_summary(round_id))
            .collect();
        json!({
            "winner": { "userId": self.winner },
            "roundCount": self.rounds.len(),
            "rounds": rounds,
        })
    }
}
