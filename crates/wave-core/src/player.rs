use serde::{Deserialize, Serialize};

/// Connection presence of a player within a room. A dropped channel marks the
/// player `Disconnected` but keeps their slot and score until the grace period
/// expires or they explicitly leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    Active,
    Disconnected,
}

/// A player inside a room. The wallet id is the stable identity across
/// reconnects; the position in `Room::players` is the join order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub wallet_id: String,
    pub username: String,
    pub is_host: bool,
    pub is_ready: bool,
    pub status: PlayerStatus,
    pub score: i32,
    pub correct_answers: u16,
}

impl Player {
    pub fn new(wallet_id: impl Into<String>, username: impl Into<String>, is_host: bool) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            username: username.into(),
            is_host,
            is_ready: false,
            status: PlayerStatus::Active,
            score: 0,
            correct_answers: 0,
        }
    }

    /// The host never readies up explicitly; it is always counted as ready.
    pub fn counts_as_ready(&self) -> bool {
        self.is_host || self.is_ready
    }
}
