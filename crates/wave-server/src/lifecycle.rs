//! Room lifecycle transitions: joining, leaving, readiness, host succession,
//! and the countdown into a running game. Every transition happens under the
//! room's entry lock so its state change and the events announcing it are
//! observed atomically.

use std::sync::Arc;
use std::time::Duration;

use wave_core::events::{LeaveReason, ServerEvent};
use wave_core::player::Player;
use wave_core::room::{MIN_PLAYERS, Room, RoomId, RoomSettings, RoomStatus};
use wave_core::time::epoch_millis;

use crate::error::ApiError;
use crate::registry::{RoomEntry, RoomHandle};
use crate::round;
use crate::state::AppState;

/// Add a player to a waiting room. Joining a room you are already in is
/// idempotent and returns the current snapshot.
pub async fn join_room(
    state: &AppState,
    room_id: &RoomId,
    wallet_id: &str,
    username: &str,
) -> Result<Room, ApiError> {
    let handle = state
        .registry
        .get(room_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("room {room_id} not found")))?;

    let mut entry = handle.entry.lock().await;
    if entry.room.player(wallet_id).is_some() {
        return Ok(entry.room.clone());
    }
    match entry.room.status {
        RoomStatus::Waiting => {},
        RoomStatus::Finished => return Err(ApiError::Gone("room is finished".into())),
        _ => return Err(ApiError::Conflict("game already started".into())),
    }
    if entry.room.is_full() {
        return Err(ApiError::Conflict("room is full".into()));
    }

    let player = Player::new(wallet_id, username, false);
    entry.room.players.push(player.clone());
    entry.broadcast(&ServerEvent::PlayerJoined { player });
    tracing::info!(room_id = %room_id, wallet = %wallet_id, "Player joined");

    if entry.room.players.len() >= MIN_PLAYERS
        && entry.countdown_task.is_none()
    {
        arm_lobby_countdown(state, &handle, &mut entry);
    }
    Ok(entry.room.clone())
}

/// Join via the shareable `ABCD-1234` code.
pub async fn join_room_by_code(
    state: &AppState,
    code: &str,
    wallet_id: &str,
    username: &str,
) -> Result<Room, ApiError> {
    let handle = state
        .registry
        .get_by_code(code)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no room with code {code}")))?;
    let room_id = handle.id;
    drop(handle);
    join_room(state, &room_id, wallet_id, username).await
}

/// Voluntary leave.
pub async fn leave_room(
    state: &AppState,
    room_id: &RoomId,
    wallet_id: &str,
) -> Result<(), ApiError> {
    let handle = state
        .registry
        .get(room_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("room {room_id} not found")))?;
    let mut entry = handle.entry.lock().await;
    if entry.room.player(wallet_id).is_none() {
        return Err(ApiError::NotFound(format!(
            "player {wallet_id} not in room"
        )));
    }
    remove_player_locked(state, &handle, &mut entry, wallet_id, LeaveReason::Left).await;
    Ok(())
}

/// Host-only eviction of another player. Works in any live phase; a
/// mid-game kick is handled like any other mid-game departure.
pub async fn kick_player(
    state: &AppState,
    room_id: &RoomId,
    actor_wallet_id: &str,
    target_wallet_id: &str,
) -> Result<(), ApiError> {
    let handle = state
        .registry
        .get(room_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("room {room_id} not found")))?;
    let mut entry = handle.entry.lock().await;
    if entry.room.host_wallet_id != actor_wallet_id {
        return Err(ApiError::NotAuthorized("only the host can kick".into()));
    }
    if actor_wallet_id == target_wallet_id {
        return Err(ApiError::Validation("host cannot kick themselves".into()));
    }
    if entry.room.status == RoomStatus::Finished {
        return Err(ApiError::Gone(format!("room {room_id} already finished")));
    }
    if entry.room.player(target_wallet_id).is_none() {
        return Err(ApiError::NotFound(format!(
            "player {target_wallet_id} not in room"
        )));
    }

    entry.send_to(
        target_wallet_id,
        &ServerEvent::Kicked {
            reason: "removed by host".into(),
        },
    );
    remove_player_locked(state, &handle, &mut entry, target_wallet_id, LeaveReason::Kicked).await;
    Ok(())
}

/// Flip a guest's ready flag. The host is implicitly ready, so a host call
/// is a silent no-op, as is setting the flag to its current value.
pub async fn set_ready(
    state: &AppState,
    room_id: &RoomId,
    wallet_id: &str,
    is_ready: bool,
) -> Result<(), ApiError> {
    let handle = state
        .registry
        .get(room_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("room {room_id} not found")))?;
    let mut entry = handle.entry.lock().await;
    if entry.room.status != RoomStatus::Waiting {
        return Err(ApiError::Conflict("readiness is fixed once started".into()));
    }
    let Some(player) = entry.room.player_mut(wallet_id) else {
        return Err(ApiError::NotFound(format!(
            "player {wallet_id} not in room"
        )));
    };
    if player.is_host || player.is_ready == is_ready {
        return Ok(());
    }
    player.is_ready = is_ready;
    entry.broadcast(&ServerEvent::PlayerReady {
        wallet_id: wallet_id.to_string(),
        is_ready,
    });
    Ok(())
}

/// Host-only settings change while the room is still waiting.
pub async fn update_settings(
    state: &AppState,
    room_id: &RoomId,
    actor_wallet_id: &str,
    settings: RoomSettings,
) -> Result<Room, ApiError> {
    if settings.total_questions() == 0 {
        return Err(ApiError::Validation(
            "settings must include at least one question".into(),
        ));
    }
    if settings.seconds_per_question == 0 {
        return Err(ApiError::Validation(
            "seconds_per_question must be > 0".into(),
        ));
    }
    let handle = state
        .registry
        .get(room_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("room {room_id} not found")))?;
    let mut entry = handle.entry.lock().await;
    if entry.room.host_wallet_id != actor_wallet_id {
        return Err(ApiError::NotAuthorized(
            "only the host can change settings".into(),
        ));
    }
    if entry.room.status != RoomStatus::Waiting {
        return Err(ApiError::Conflict(
            "settings are frozen once the game starts".into(),
        ));
    }
    entry.room.settings = settings.clone();
    entry.broadcast(&ServerEvent::RoomConfigUpdate { settings });
    Ok(entry.room.clone())
}

/// Host-initiated start. Requires enough players and a unanimous ready
/// lobby, then moves into the start countdown.
pub async fn start_game(
    state: &AppState,
    room_id: &RoomId,
    actor_wallet_id: &str,
) -> Result<(), ApiError> {
    let handle = state
        .registry
        .get(room_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("room {room_id} not found")))?;
    let mut entry = handle.entry.lock().await;
    if entry.room.host_wallet_id != actor_wallet_id {
        return Err(ApiError::NotAuthorized("only the host can start".into()));
    }
    if entry.room.status != RoomStatus::Waiting {
        return Err(ApiError::Conflict("game already started".into()));
    }
    if entry.room.players.len() < MIN_PLAYERS {
        return Err(ApiError::Conflict(format!(
            "need at least {} players",
            MIN_PLAYERS
        )));
    }
    if !entry.room.all_ready() {
        return Err(ApiError::Conflict("not all players are ready".into()));
    }
    begin_starting(state, &handle, &mut entry);
    Ok(())
}

/// Remove a player under the entry lock, transferring the host role first
/// when the host is the one leaving. `host_transfer` is broadcast before
/// `player_left` so clients never observe a hostless room.
pub(crate) async fn remove_player_locked(
    state: &AppState,
    handle: &Arc<RoomHandle>,
    entry: &mut RoomEntry,
    wallet_id: &str,
    reason: LeaveReason,
) {
    entry.cancel_grace(wallet_id);
    entry.connections.remove(wallet_id);

    let was_host = entry.room.host_wallet_id == wallet_id;
    let Some(pos) = entry
        .room
        .players
        .iter()
        .position(|p| p.wallet_id == wallet_id)
    else {
        return;
    };
    entry.room.players.remove(pos);
    tracing::info!(room_id = %handle.id, wallet = %wallet_id, ?reason, "Player removed");

    if entry.room.players.is_empty() {
        finish_empty_room(state, handle, entry).await;
        return;
    }

    if was_host && let Some(next) = entry.room.succession_candidate() {
        let next_wallet = next.wallet_id.clone();
        entry.room.host_wallet_id = next_wallet.clone();
        if let Some(p) = entry.room.player_mut(&next_wallet) {
            p.is_host = true;
        }
        entry.broadcast(&ServerEvent::HostTransfer {
            new_host_wallet_id: next_wallet.clone(),
        });
        tracing::info!(room_id = %handle.id, new_host = %next_wallet, "Host transferred");
    }
    entry.broadcast(&ServerEvent::PlayerLeft {
        wallet_id: wallet_id.to_string(),
        reason,
    });

    match entry.room.status {
        RoomStatus::Waiting => {
            if entry.room.players.len() < MIN_PLAYERS {
                entry.cancel_countdown();
                entry.bump_epoch();
            }
        },
        RoomStatus::Starting => {
            // Not enough players to launch; fall back to the lobby.
            if entry.room.players.len() < MIN_PLAYERS {
                entry.cancel_countdown();
                entry.bump_epoch();
                entry.room.status = RoomStatus::Waiting;
            }
        },
        RoomStatus::InProgress => {
            if entry.room.players.len() == 1 {
                round::finish_game(state, handle, entry).await;
            } else {
                round::maybe_resolve_early(state, handle, entry).await;
            }
        },
        RoomStatus::Finished => {},
    }
}

/// Last player gone: close the room out and free its join code. The reaper
/// drops the registry entry once the finished TTL elapses.
async fn finish_empty_room(state: &AppState, handle: &Arc<RoomHandle>, entry: &mut RoomEntry) {
    entry.cancel_countdown();
    entry.cancel_deadline();
    entry.bump_epoch();
    entry.room.status = RoomStatus::Finished;
    entry.finished_at = Some(epoch_millis());
    state.registry.release_code(&entry.room.code).await;
    tracing::info!(room_id = %handle.id, "Room emptied and closed");
}

/// Arm the lobby auto-start timer. When it fires with enough ready players
/// the game force-starts; otherwise the timer re-arms.
pub(crate) fn arm_lobby_countdown(
    state: &AppState,
    handle: &Arc<RoomHandle>,
    entry: &mut RoomEntry,
) {
    let epoch = entry.epoch;
    let room_id = handle.id;
    let state = state.clone();
    let delay = Duration::from_secs(state.config.rooms.lobby_countdown_secs);
    entry.countdown_task = Some(tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let Some(handle) = state.registry.get(&room_id).await else {
            return;
        };
        let mut entry = handle.entry.lock().await;
        if entry.epoch != epoch || entry.room.status != RoomStatus::Waiting {
            return;
        }
        entry.countdown_task = None;
        if entry.room.ready_count() >= MIN_PLAYERS {
            tracing::info!(room_id = %room_id, "Lobby countdown expired, force starting");
            begin_starting(&state, &handle, &mut entry);
        } else {
            tracing::debug!(room_id = %room_id, "Lobby countdown expired without quorum, re-arming");
            arm_lobby_countdown(&state, &handle, &mut entry);
        }
    }));
}

/// Move the room into `Starting`, announce the synchronized start time, and
/// schedule the hop into the first question.
pub(crate) fn begin_starting(state: &AppState, handle: &Arc<RoomHandle>, entry: &mut RoomEntry) {
    entry.cancel_countdown();
    let epoch = entry.bump_epoch();
    entry.room.status = RoomStatus::Starting;

    let countdown_secs = state.config.rooms.start_countdown_secs;
    let start_at = epoch_millis() + countdown_secs * 1000;
    entry.broadcast(&ServerEvent::GameStarted {
        start_at,
        countdown_duration: countdown_secs,
    });
    tracing::info!(room_id = %handle.id, start_at, "Game starting");

    let room_id = handle.id;
    let state = state.clone();
    entry.countdown_task = Some(tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(countdown_secs)).await;
        round::launch_game(&state, &room_id, epoch).await;
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attest::LogRewardSink;
    use crate::config::ServerConfig;
    use crate::questions::QuestionBank;
    use crate::registry::Connection;
    use std::path::Path;
    use tokio::sync::mpsc;
    use wave_core::events::decode_server_event;

    fn test_state() -> AppState {
        let questions = QuestionBank::load_or_default(Path::new("/nonexistent"));
        AppState::new(ServerConfig::default(), questions, Arc::new(LogRewardSink))
    }

    async fn wired_room(
        state: &AppState,
        guests: &[&str],
    ) -> (
        Arc<RoomHandle>,
        Vec<(String, mpsc::Receiver<axum::extract::ws::Utf8Bytes>)>,
    ) {
        let handle = state
            .registry
            .create_room("0xhost", "host", RoomSettings::default())
            .await;
        for guest in guests {
            join_room(state, &handle.id, guest, guest).await.unwrap();
        }
        let mut rxs = Vec::new();
        let mut entry = handle.entry.lock().await;
        let wallets: Vec<String> = entry.room.players.iter().map(|p| p.wallet_id.clone()).collect();
        for wallet in wallets {
            let (tx, rx) = mpsc::channel(16);
            let conn_id = state.registry.next_conn_id();
            entry.connections.insert(wallet.clone(), Connection::new(conn_id, tx));
            rxs.push((wallet, rx));
        }
        drop(entry);
        (handle, rxs)
    }

    fn drain(rx: &mut mpsc::Receiver<axum::extract::ws::Utf8Bytes>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            events.push(decode_server_event(frame.as_str()).unwrap());
        }
        events
    }

    #[tokio::test]
    async fn join_is_idempotent() {
        let state = test_state();
        let handle = state
            .registry
            .create_room("0xhost", "host", RoomSettings::default())
            .await;
        let first = join_room(&state, &handle.id, "0xa", "alice").await.unwrap();
        let second = join_room(&state, &handle.id, "0xa", "alice").await.unwrap();
        assert_eq!(first.players.len(), 2);
        assert_eq!(second.players.len(), 2);
    }

    #[tokio::test]
    async fn join_rejected_when_full() {
        let state = test_state();
        let handle = state
            .registry
            .create_room("0xhost", "host", RoomSettings::default())
            .await;
        for i in 0..3 {
            join_room(&state, &handle.id, &format!("0x{i}"), "p").await.unwrap();
        }
        let err = join_room(&state, &handle.id, "0xlate", "late").await;
        assert!(matches!(err, Err(ApiError::Conflict(_))));
    }

    #[tokio::test]
    async fn concurrent_joins_never_exceed_capacity() {
        let state = test_state();
        let handle = state
            .registry
            .create_room("0xhost", "host", RoomSettings::default())
            .await;
        let joins = (0..6).map(|i| {
            let state = state.clone();
            let room_id = handle.id;
            async move { join_room(&state, &room_id, &format!("0x{i}"), "p").await }
        });
        let results = futures::future::join_all(joins).await;
        let ok = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok, 3);
        let entry = handle.entry.lock().await;
        assert_eq!(entry.room.players.len(), 4);
    }

    #[tokio::test]
    async fn host_leave_transfers_before_announcing_departure() {
        let state = test_state();
        let (handle, mut rxs) = wired_room(&state, &["0xa", "0xb"]).await;
        leave_room(&state, &handle.id, "0xhost").await.unwrap();

        let (_, rx) = rxs.iter_mut().find(|(w, _)| w == "0xa").unwrap();
        let events = drain(rx);
        let transfer_pos = events
            .iter()
            .position(|e| matches!(e, ServerEvent::HostTransfer { .. }))
            .expect("host_transfer sent");
        let left_pos = events
            .iter()
            .position(|e| matches!(e, ServerEvent::PlayerLeft { .. }))
            .expect("player_left sent");
        assert!(transfer_pos < left_pos);

        let entry = handle.entry.lock().await;
        assert_eq!(entry.room.host_wallet_id, "0xa");
        assert!(entry.room.player("0xa").unwrap().is_host);
    }

    #[tokio::test]
    async fn last_leave_finishes_room_and_frees_code() {
        let state = test_state();
        let handle = state
            .registry
            .create_room("0xhost", "host", RoomSettings::default())
            .await;
        let code = handle.entry.lock().await.room.code.clone();
        leave_room(&state, &handle.id, "0xhost").await.unwrap();

        let entry = handle.entry.lock().await;
        assert_eq!(entry.room.status, RoomStatus::Finished);
        assert!(entry.finished_at.is_some());
        drop(entry);
        assert!(state.registry.get_by_code(&code).await.is_none());
    }

    #[tokio::test]
    async fn set_ready_broadcasts_only_on_change() {
        let state = test_state();
        let (handle, mut rxs) = wired_room(&state, &["0xa"]).await;
        set_ready(&state, &handle.id, "0xa", true).await.unwrap();
        set_ready(&state, &handle.id, "0xa", true).await.unwrap();

        let (_, rx) = rxs.iter_mut().find(|(w, _)| w == "0xhost").unwrap();
        let ready_events: Vec<_> = drain(rx)
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::PlayerReady { .. }))
            .collect();
        assert_eq!(ready_events.len(), 1);
    }

    #[tokio::test]
    async fn host_ready_is_silent_noop() {
        let state = test_state();
        let (handle, mut rxs) = wired_room(&state, &["0xa"]).await;
        set_ready(&state, &handle.id, "0xhost", true).await.unwrap();
        let (_, rx) = rxs.iter_mut().find(|(w, _)| w == "0xa").unwrap();
        assert!(
            drain(rx)
                .iter()
                .all(|e| !matches!(e, ServerEvent::PlayerReady { .. }))
        );
    }

    #[tokio::test]
    async fn kick_requires_host() {
        let state = test_state();
        let (handle, _rxs) = wired_room(&state, &["0xa", "0xb"]).await;
        let err = kick_player(&state, &handle.id, "0xa", "0xb").await;
        assert!(matches!(err, Err(ApiError::NotAuthorized(_))));
        kick_player(&state, &handle.id, "0xhost", "0xb").await.unwrap();
        let entry = handle.entry.lock().await;
        assert!(entry.room.player("0xb").is_none());
    }

    #[tokio::test]
    async fn kick_works_mid_game() {
        use crate::registry::RoundState;
        use wave_core::question::Difficulty;
        use wave_core::test_helpers::make_question;

        let state = test_state();
        let (handle, mut rxs) = wired_room(&state, &["0xa", "0xb"]).await;
        {
            let mut entry = handle.entry.lock().await;
            entry.room.status = RoomStatus::InProgress;
            let mut round = RoundState::new(vec![make_question("q0", Difficulty::Easy)]);
            round.question_sent_at = epoch_millis();
            entry.round = Some(round);
        }
        kick_player(&state, &handle.id, "0xhost", "0xb").await.unwrap();
        {
            let entry = handle.entry.lock().await;
            assert!(entry.room.player("0xb").is_none());
            assert_eq!(entry.room.status, RoomStatus::InProgress);
        }
        let (_, rx) = rxs.iter_mut().find(|(w, _)| w == "0xb").unwrap();
        assert!(
            drain(rx)
                .iter()
                .any(|e| matches!(e, ServerEvent::Kicked { .. }))
        );
    }

    #[tokio::test]
    async fn kicked_player_gets_unicast_notice() {
        let state = test_state();
        let (handle, mut rxs) = wired_room(&state, &["0xa"]).await;
        kick_player(&state, &handle.id, "0xhost", "0xa").await.unwrap();
        let (_, rx) = rxs.iter_mut().find(|(w, _)| w == "0xa").unwrap();
        assert!(
            drain(rx)
                .iter()
                .any(|e| matches!(e, ServerEvent::Kicked { .. }))
        );
    }

    #[tokio::test]
    async fn start_requires_unanimous_ready() {
        let state = test_state();
        let (handle, _rxs) = wired_room(&state, &["0xa", "0xb"]).await;
        let err = start_game(&state, &handle.id, "0xhost").await;
        assert!(matches!(err, Err(ApiError::Conflict(_))));

        set_ready(&state, &handle.id, "0xa", true).await.unwrap();
        set_ready(&state, &handle.id, "0xb", true).await.unwrap();
        start_game(&state, &handle.id, "0xhost").await.unwrap();
        let entry = handle.entry.lock().await;
        assert_eq!(entry.room.status, RoomStatus::Starting);
    }

    #[tokio::test]
    async fn start_rejected_below_min_players() {
        let state = test_state();
        let handle = state
            .registry
            .create_room("0xhost", "host", RoomSettings::default())
            .await;
        let err = start_game(&state, &handle.id, "0xhost").await;
        assert!(matches!(err, Err(ApiError::Conflict(_))));
    }

    #[tokio::test]
    async fn settings_update_rejects_non_host_and_empty_deck() {
        let state = test_state();
        let (handle, _rxs) = wired_room(&state, &["0xa"]).await;
        let settings = RoomSettings {
            easy_questions: 0,
            medium_questions: 0,
            hard_questions: 0,
            seconds_per_question: 15,
        };
        assert!(matches!(
            update_settings(&state, &handle.id, "0xhost", settings).await,
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            update_settings(&state, &handle.id, "0xa", RoomSettings::default()).await,
            Err(ApiError::NotAuthorized(_))
        ));
    }

    #[tokio::test]
    async fn join_arms_lobby_countdown_at_quorum() {
        let state = test_state();
        let handle = state
            .registry
            .create_room("0xhost", "host", RoomSettings::default())
            .await;
        {
            let entry = handle.entry.lock().await;
            assert!(entry.countdown_task.is_none());
        }
        join_room(&state, &handle.id, "0xa", "a").await.unwrap();
        let entry = handle.entry.lock().await;
        assert!(entry.countdown_task.is_some());
    }

    #[tokio::test]
    async fn lobby_countdown_expiry_forces_start_with_quorum() {
        let state = test_state();
        let (handle, mut rxs) = wired_room(&state, &["0xa"]).await;
        set_ready(&state, &handle.id, "0xa", true).await.unwrap();

        tokio::time::pause();
        let lobby = state.config.rooms.lobby_countdown_secs;
        tokio::time::sleep(Duration::from_secs(lobby + 1)).await;
        tokio::task::yield_now().await;

        {
            let entry = handle.entry.lock().await;
            assert_eq!(entry.room.status, RoomStatus::Starting);
        }
        let events = drain(&mut rxs[0].1);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, ServerEvent::GameStarted { .. }))
        );
    }

    #[tokio::test]
    async fn lobby_countdown_expiry_rearms_without_quorum() {
        let state = test_state();
        let (handle, mut rxs) = wired_room(&state, &["0xa"]).await;

        tokio::time::pause();
        let lobby = state.config.rooms.lobby_countdown_secs;
        tokio::time::sleep(Duration::from_secs(lobby + 1)).await;
        tokio::task::yield_now().await;

        {
            let entry = handle.entry.lock().await;
            assert_eq!(entry.room.status, RoomStatus::Waiting);
            assert!(entry.countdown_task.is_some());
        }
        let events = drain(&mut rxs[0].1);
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, ServerEvent::GameStarted { .. }))
        );
    }
}
