use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::player::Player;
use crate::question::ClientQuestion;
use crate::room::{Room, RoomSettings};

/// Maximum size of a single WebSocket text frame.
pub const MAX_EVENT_SIZE: usize = 16 * 1024;

/// Histogram bucket for players who let the deadline pass.
pub const NO_ANSWER_BUCKET: &str = "No Answer";

/// Option-text → submission-count histogram for one question, including the
/// [`NO_ANSWER_BUCKET`]. BTreeMap keeps the wire order stable.
pub type AnswerStats = BTreeMap<String, usize>;

#[derive(Debug)]
pub enum ProtocolError {
    EmptyFrame,
    FrameTooLarge(usize),
    Encode(String),
    Decode(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyFrame => write!(f, "empty frame"),
            Self::FrameTooLarge(size) => {
                write!(f, "frame too large: {size} bytes (max {MAX_EVENT_SIZE})")
            },
            Self::Encode(e) => write!(f, "encode error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Why a player left the room, carried on `player_left`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    Left,
    Kicked,
    TimedOut,
}

/// One row of the running leaderboard broadcast with each question result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub wallet_id: String,
    pub username: String,
    pub score: i32,
    pub rank: usize,
    /// Positions gained (positive) or lost since the previous question.
    pub rank_delta: i64,
}

/// Final placement of one player, broadcast with `game_ended`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalStanding {
    pub wallet_id: String,
    pub username: String,
    pub score: i32,
    pub correct_answers: u16,
    pub rank: usize,
    pub is_winner: bool,
}

/// Events a client may send over its session channel. Unknown types fail to
/// decode rather than being silently ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientEvent {
    Ping,
    Chat {
        message: String,
    },
    SubmitAnswer {
        question_index: usize,
        option: usize,
        response_time_ms: u64,
    },
    StartGame,
    KickPlayer {
        target_wallet_id: String,
    },
    LeaveRoom,
}

/// Events the server pushes to session channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Pong,
    /// Full authoritative state, sent to a channel on attach/reattach.
    /// Clients replace their cache wholesale; there is no diff protocol.
    RoomSnapshot {
        room: Room,
    },
    PlayerJoined {
        player: Player,
    },
    PlayerLeft {
        wallet_id: String,
        reason: LeaveReason,
    },
    PlayerDisconnected {
        wallet_id: String,
    },
    PlayerReconnected {
        wallet_id: String,
    },
    HostTransfer {
        new_host_wallet_id: String,
    },
    Kicked {
        reason: String,
    },
    PlayerReady {
        wallet_id: String,
        is_ready: bool,
    },
    RoomConfigUpdate {
        settings: RoomSettings,
    },
    GameStarted {
        start_at: u64,
        countdown_duration: u64,
    },
    NextQuestion {
        question: ClientQuestion,
        index: usize,
        total: usize,
        deadline: u64,
    },
    AnswerAcknowledged {
        question_index: usize,
    },
    QuestionResult {
        question_index: usize,
        correct_option: usize,
        answer_stats: AnswerStats,
        leaderboard: Vec<LeaderboardEntry>,
    },
    GameEnded {
        results: Vec<FinalStanding>,
        winner_wallet_id: String,
        result_digest: String,
    },
    Chat {
        sender: String,
        message: String,
    },
    Error {
        message: String,
    },
}

pub fn encode_server_event(event: &ServerEvent) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(event).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    if text.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(text)
}

pub fn encode_client_event(event: &ClientEvent) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(event).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    if text.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(text)
}

pub fn decode_client_event(text: &str) -> Result<ClientEvent, ProtocolError> {
    if text.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }
    if text.len() > MAX_EVENT_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    serde_json::from_str(text).map_err(|e| ProtocolError::Decode(e.to_string()))
}

pub fn decode_server_event(text: &str) -> Result<ServerEvent, ProtocolError> {
    if text.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }
    serde_json::from_str(text).map_err(|e| ProtocolError::Decode(e.to_string()))
}
