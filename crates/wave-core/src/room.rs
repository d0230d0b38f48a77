use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::player::{Player, PlayerStatus};
use crate::question::Difficulty;

/// Hard cap on room membership.
pub const MAX_PLAYERS: usize = 4;
/// Minimum ready players required before a game may start.
pub const MIN_PLAYERS: usize = 2;

pub type RoomId = uuid::Uuid;

/// Lifecycle state of a room.
///
/// `Waiting → Starting → InProgress → Finished`, with an early hop to
/// `Finished` when the last player leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Waiting,
    Starting,
    InProgress,
    Finished,
}

/// Per-room game settings: how many questions per difficulty tier and how
/// long each question stays open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    pub easy_questions: u8,
    pub medium_questions: u8,
    pub hard_questions: u8,
    pub seconds_per_question: u16,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            easy_questions: 5,
            medium_questions: 3,
            hard_questions: 2,
            seconds_per_question: 15,
        }
    }
}

impl RoomSettings {
    pub fn total_questions(&self) -> usize {
        self.easy_questions as usize + self.medium_questions as usize + self.hard_questions as usize
    }

    pub fn count_for(&self, difficulty: Difficulty) -> usize {
        match difficulty {
            Difficulty::Easy => self.easy_questions as usize,
            Difficulty::Medium => self.medium_questions as usize,
            Difficulty::Hard => self.hard_questions as usize,
        }
    }
}

/// A quiz room: membership, settings, and lifecycle status. This is the
/// authoritative state; clients only ever hold snapshots of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub code: String,
    pub status: RoomStatus,
    pub host_wallet_id: String,
    pub players: Vec<Player>,
    pub settings: RoomSettings,
    pub created_at: u64,
}

impl Room {
    pub fn new(id: RoomId, code: String, host: Player, settings: RoomSettings) -> Self {
        Self {
            id,
            code,
            status: RoomStatus::Waiting,
            host_wallet_id: host.wallet_id.clone(),
            players: vec![host],
            settings,
            created_at: crate::time::epoch_millis(),
        }
    }

    pub fn player(&self, wallet_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.wallet_id == wallet_id)
    }

    pub fn player_mut(&mut self, wallet_id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.wallet_id == wallet_id)
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= MAX_PLAYERS
    }

    /// Ready headcount; the host is implicitly ready.
    pub fn ready_count(&self) -> usize {
        self.players.iter().filter(|p| p.counts_as_ready()).count()
    }

    pub fn all_ready(&self) -> bool {
        self.ready_count() == self.players.len()
    }

    /// Earliest-joined active player, the deterministic host-succession pick.
    /// Falls back to the earliest-joined player when everyone is disconnected.
    pub fn succession_candidate(&self) -> Option<&Player> {
        self.players
            .iter()
            .find(|p| p.status == PlayerStatus::Active)
            .or_else(|| self.players.first())
    }
}

const CODE_LETTERS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Generate a shareable room code in the form `ABCD-1234`.
pub fn generate_room_code() -> String {
    let mut rng = rand::rng();
    let mut code = String::with_capacity(9);
    for _ in 0..4 {
        let idx = rng.random_range(0..CODE_LETTERS.len());
        code.push(CODE_LETTERS[idx] as char);
    }
    code.push('-');
    for _ in 0..4 {
        code.push(char::from_digit(rng.random_range(0..10), 10).unwrap_or('0'));
    }
    code
}

/// Validate the `ABCD-1234` room code format.
pub fn is_valid_room_code(code: &str) -> bool {
    let bytes = code.as_bytes();
    bytes.len() == 9
        && bytes[..4].iter().all(|b| CODE_LETTERS.contains(b))
        && bytes[4] == b'-'
        && bytes[5..].iter().all(|b| b.is_ascii_digit())
}
