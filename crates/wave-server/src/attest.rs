use serde_json::json;
use sha2::{Digest, Sha256};
use wave_core::events::FinalStanding;
use wave_core::room::RoomId;

/// Deterministic digest over a game's final outcome. Two servers given the
/// same room id, winner, and standings will produce the same hex string.
pub fn result_digest(room_id: &RoomId, winner_wallet_id: &str, standings: &[FinalStanding]) -> String {
    let payload = json!({
        "roomId": room_id.to_string(),
        "winner": winner_wallet_id,
        "standings": standings,
    });
    // Keys come out of serde_json in insertion order, so the serialization
    // is stable for a fixed input.
    let bytes = serde_json::to_vec(&payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

/// Downstream consumer of finished-game results. The production sink would
/// talk to the reward service; the default just records the outcome.
pub trait RewardSink: Send + Sync {
    fn submit_result(
        &self,
        room_id: &RoomId,
        winner_wallet_id: &str,
        winning_score: i32,
        digest: &str,
    ) -> Result<(), String>;
}

/// Sink that logs the result and always succeeds.
pub struct LogRewardSink;

impl RewardSink for LogRewardSink {
    fn submit_result(
        &self,
        room_id: &RoomId,
        winner_wallet_id: &str,
        winning_score: i32,
        digest: &str,
    ) -> Result<(), String> {
        tracing::info!(
            room_id = %room_id,
            winner = %winner_wallet_id,
            score = winning_score,
            digest = %digest,
            "Game result recorded"
        );
        Ok(())
    }
}

/// Submit a result, retrying once on failure. A second failure is logged and
/// swallowed so game teardown never blocks on the reward pipeline.
pub fn submit_with_retry(
    sink: &dyn RewardSink,
    room_id: &RoomId,
    winner_wallet_id: &str,
    winning_score: i32,
    digest: &str,
) {
    for attempt in 1..=2 {
        match sink.submit_result(room_id, winner_wallet_id, winning_score, digest) {
            Ok(()) => return,
            Err(e) if attempt == 1 => {
                tracing::warn!(room_id = %room_id, error = %e, "Reward submission failed, retrying");
            },
            Err(e) => {
                tracing::error!(room_id = %room_id, error = %e, "Reward submission failed twice, giving up");
            },
        }
    }
}
