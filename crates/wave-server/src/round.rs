//! The in-game question loop: dealing questions, collecting answers, scoring,
//! and closing the game out with final standings and a result digest.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use wave_core::events::{
    AnswerStats, FinalStanding, LeaderboardEntry, NO_ANSWER_BUCKET, ServerEvent,
};
use wave_core::player::PlayerStatus;
use wave_core::question::{AnswerRecord, ClientQuestion, score_answer};
use wave_core::room::{RoomId, RoomStatus};
use wave_core::time::epoch_millis;

use crate::attest;
use crate::error::ApiError;
use crate::registry::{RoomEntry, RoomHandle, RoundState};
use crate::state::AppState;

/// Called by the start countdown when it expires. Builds the deck, resets
/// scores, and deals the first question. No-ops if the room moved on.
pub(crate) async fn launch_game(state: &AppState, room_id: &RoomId, epoch: u64) {
    let Some(handle) = state.registry.get(room_id).await else {
        return;
    };
    let mut entry = handle.entry.lock().await;
    if entry.epoch != epoch || entry.room.status != RoomStatus::Starting {
        return;
    }
    entry.countdown_task = None;

    let deck = state.questions.build_deck(&entry.room.settings);
    if deck.is_empty() {
        tracing::error!(room_id = %room_id, "No questions available, returning room to lobby");
        entry.room.status = RoomStatus::Waiting;
        entry.bump_epoch();
        entry.broadcast(&ServerEvent::Error {
            message: "no questions available for the configured settings".into(),
        });
        return;
    }

    for player in &mut entry.room.players {
        player.score = 0;
        player.correct_answers = 0;
    }
    entry.room.status = RoomStatus::InProgress;
    entry.round = Some(RoundState::new(deck));
    tracing::info!(room_id = %room_id, "Game launched");
    send_current_question(state, &handle, &mut entry);
}

/// Broadcast the current question and arm its deadline timer.
pub(crate) fn send_current_question(
    state: &AppState,
    handle: &Arc<RoomHandle>,
    entry: &mut RoomEntry,
) {
    let epoch = entry.bump_epoch();
    let limit_ms = entry.room.settings.seconds_per_question as u64 * 1000;
    let total = entry
        .round
        .as_ref()
        .map(|r| r.deck.len())
        .unwrap_or_default();

    let Some(round) = entry.round.as_mut() else {
        return;
    };
    let index = round.current_index;
    let Some(question) = round.deck.get(index) else {
        return;
    };
    let client_question = ClientQuestion::from(question);
    let now = epoch_millis();
    round.question_sent_at = now;

    let room_id = handle.id;
    let state_clone = state.clone();
    round.deadline_task = Some(tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(limit_ms)).await;
        let Some(handle) = state_clone.registry.get(&room_id).await else {
            return;
        };
        let mut entry = handle.entry.lock().await;
        if entry.epoch != epoch || entry.room.status != RoomStatus::InProgress {
            return;
        }
        tracing::debug!(room_id = %room_id, index, "Question deadline reached");
        resolve_question(&state_clone, &handle, &mut entry).await;
    }));

    entry.broadcast(&ServerEvent::NextQuestion {
        question: client_question,
        index,
        total,
        deadline: now + limit_ms,
    });
}

/// Record one player's answer to the current question. Duplicate submissions
/// re-acknowledge without rescoring; answers to any other index are stale.
pub async fn submit_answer(
    state: &AppState,
    room_id: &RoomId,
    wallet_id: &str,
    question_index: usize,
    option: usize,
) -> Result<(), ApiError> {
    let handle = state
        .registry
        .get(room_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("room {room_id} not found")))?;
    let mut entry = handle.entry.lock().await;
    if entry.room.status != RoomStatus::InProgress {
        return Err(ApiError::Conflict("no question is open".into()));
    }
    if entry.room.player(wallet_id).is_none() {
        return Err(ApiError::NotFound(format!(
            "player {wallet_id} not in room"
        )));
    }
    let limit_ms = entry.room.settings.seconds_per_question as u64 * 1000;

    let (is_duplicate, question, sent_at) = {
        let Some(round) = entry.round.as_ref() else {
            return Err(ApiError::Conflict("no question is open".into()));
        };
        if question_index != round.current_index {
            return Err(ApiError::StaleRequest(format!(
                "question {question_index} is not the current one"
            )));
        }
        // question_sent_at is zeroed during the inter-question pause.
        if round.question_sent_at == 0 {
            return Err(ApiError::Conflict("no question is open".into()));
        }
        let Some(question) = round.current_question() else {
            return Err(ApiError::Conflict("no question is open".into()));
        };
        (
            round.answers.contains_key(wallet_id),
            question.clone(),
            round.question_sent_at,
        )
    };
    if is_duplicate {
        entry.send_to(wallet_id, &ServerEvent::AnswerAcknowledged { question_index });
        return Ok(());
    }
    if option >= question.options.len() {
        return Err(ApiError::Validation(format!(
            "option {option} out of range"
        )));
    }

    // Response time is measured server-side from broadcast to receipt, so a
    // client cannot claim to have been faster than it was.
    let elapsed = epoch_millis().saturating_sub(sent_at).min(limit_ms);
    let is_correct = option == question.correct_option;
    let points = score_answer(question.difficulty, is_correct, elapsed, limit_ms);
    if let Some(round) = entry.round.as_mut() {
        round.answers.insert(
            wallet_id.to_string(),
            AnswerRecord {
                wallet_id: wallet_id.to_string(),
                question_index,
                selected_option: Some(option),
                response_time_ms: elapsed,
                is_correct,
                points_awarded: points,
            },
        );
    }

    if let Some(player) = entry.room.player_mut(wallet_id) {
        player.score += points;
        if is_correct {
            player.correct_answers += 1;
        }
    }
    entry.send_to(wallet_id, &ServerEvent::AnswerAcknowledged { question_index });
    tracing::debug!(
        room_id = %room_id,
        wallet = %wallet_id,
        question_index,
        is_correct,
        points,
        "Answer recorded"
    );

    maybe_resolve_early(state, &handle, &mut entry).await;
    Ok(())
}

/// Resolve the current question ahead of the deadline once every active
/// player has answered.
pub(crate) async fn maybe_resolve_early(
    state: &AppState,
    handle: &Arc<RoomHandle>,
    entry: &mut RoomEntry,
) {
    if entry.room.status != RoomStatus::InProgress {
        return;
    }
    let Some(round) = entry.round.as_ref() else {
        return;
    };
    let all_answered = entry
        .room
        .players
        .iter()
        .filter(|p| p.status == PlayerStatus::Active)
        .all(|p| round.answers.contains_key(&p.wallet_id));
    if all_answered && entry.active_player_count() > 0 {
        entry.cancel_deadline();
        resolve_question(state, handle, entry).await;
    }
}

/// Score the current question for everyone, broadcast the result and the
/// running leaderboard, then schedule the next question or end the game.
pub(crate) async fn resolve_question(
    state: &AppState,
    handle: &Arc<RoomHandle>,
    entry: &mut RoomEntry,
) {
    let epoch = entry.bump_epoch();
    let limit_ms = entry.room.settings.seconds_per_question as u64 * 1000;

    let wallets: Vec<String> = entry
        .room
        .players
        .iter()
        .map(|p| p.wallet_id.clone())
        .collect();
    let Some(round) = entry.round.as_mut() else {
        return;
    };
    round.deadline_task = None;
    round.question_sent_at = 0;
    let index = round.current_index;
    let Some(question) = round.deck.get(index).cloned() else {
        return;
    };

    // Players who never answered get a zero-point timeout record.
    for wallet in &wallets {
        round
            .answers
            .entry(wallet.clone())
            .or_insert_with(|| AnswerRecord::timeout(wallet.clone(), index, limit_ms));
    }

    let mut stats = AnswerStats::new();
    for record in round.answers.values() {
        let bucket = match record.selected_option {
            Some(i) => question
                .options
                .get(i)
                .cloned()
                .unwrap_or_else(|| NO_ANSWER_BUCKET.to_string()),
            None => NO_ANSWER_BUCKET.to_string(),
        };
        *stats.entry(bucket).or_insert(0) += 1;
    }

    round.answers.clear();
    round.current_index += 1;
    let prev_ranks = std::mem::take(&mut round.prev_ranks);
    let finished = round.current_index >= round.deck.len();

    let board = leaderboard(entry, &prev_ranks);
    if let Some(round) = entry.round.as_mut() {
        round.prev_ranks = board.iter().map(|e| (e.wallet_id.clone(), e.rank)).collect();
    }
    entry.broadcast(&ServerEvent::QuestionResult {
        question_index: index,
        correct_option: question.correct_option,
        answer_stats: stats,
        leaderboard: board,
    });

    if finished {
        finish_game(state, handle, entry).await;
        return;
    }

    let pause = Duration::from_secs(state.config.rooms.inter_question_pause_secs);
    let room_id = handle.id;
    let state_clone = state.clone();
    if let Some(round) = entry.round.as_mut() {
        round.deadline_task = Some(tokio::spawn(async move {
            tokio::time::sleep(pause).await;
            let Some(handle) = state_clone.registry.get(&room_id).await else {
                return;
            };
            let mut entry = handle.entry.lock().await;
            if entry.epoch != epoch || entry.room.status != RoomStatus::InProgress {
                return;
            }
            send_current_question(&state_clone, &handle, &mut entry);
        }));
    }
}

/// Standings order: score, then correct answers, then join order.
fn ranked_indices(entry: &RoomEntry) -> Vec<usize> {
    let mut order: Vec<usize> = (0..entry.room.players.len()).collect();
    order.sort_by(|&a, &b| {
        let pa = &entry.room.players[a];
        let pb = &entry.room.players[b];
        pb.score
            .cmp(&pa.score)
            .then(pb.correct_answers.cmp(&pa.correct_answers))
            .then(a.cmp(&b))
    });
    order
}

fn leaderboard(entry: &RoomEntry, prev_ranks: &HashMap<String, usize>) -> Vec<LeaderboardEntry> {
    ranked_indices(entry)
        .into_iter()
        .enumerate()
        .map(|(pos, idx)| {
            let player = &entry.room.players[idx];
            let rank = pos + 1;
            let rank_delta = prev_ranks
                .get(&player.wallet_id)
                .map(|&prev| prev as i64 - rank as i64)
                .unwrap_or(0);
            LeaderboardEntry {
                wallet_id: player.wallet_id.clone(),
                username: player.username.clone(),
                score: player.score,
                rank,
                rank_delta,
            }
        })
        .collect()
}

/// Close the game out: final standings, winner, digest, reward submission,
/// and the hop to `Finished`.
pub(crate) async fn finish_game(state: &AppState, handle: &Arc<RoomHandle>, entry: &mut RoomEntry) {
    entry.cancel_countdown();
    entry.cancel_deadline();
    entry.bump_epoch();
    entry.round = None;

    let results: Vec<FinalStanding> = ranked_indices(entry)
        .into_iter()
        .enumerate()
        .map(|(pos, idx)| {
            let player = &entry.room.players[idx];
            FinalStanding {
                wallet_id: player.wallet_id.clone(),
                username: player.username.clone(),
                score: player.score,
                correct_answers: player.correct_answers,
                rank: pos + 1,
                is_winner: pos == 0,
            }
        })
        .collect();

    let Some(winner) = results.first().cloned() else {
        entry.room.status = RoomStatus::Finished;
        entry.finished_at = Some(epoch_millis());
        state.registry.release_code(&entry.room.code).await;
        return;
    };

    let digest = attest::result_digest(&handle.id, &winner.wallet_id, &results);
    entry.room.status = RoomStatus::Finished;
    entry.finished_at = Some(epoch_millis());
    entry.broadcast(&ServerEvent::GameEnded {
        results,
        winner_wallet_id: winner.wallet_id.clone(),
        result_digest: digest.clone(),
    });
    state.registry.release_code(&entry.room.code).await;
    tracing::info!(
        room_id = %handle.id,
        winner = %winner.wallet_id,
        score = winner.score,
        "Game ended"
    );
    attest::submit_with_retry(
        state.rewards.as_ref(),
        &handle.id,
        &winner.wallet_id,
        winner.score,
        &digest,
    );
}
