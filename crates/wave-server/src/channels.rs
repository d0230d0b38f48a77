//! Session channel attach and detach. A player's identity is their wallet;
//! sockets come and go underneath it. The newest attach always wins, and a
//! detached player keeps their slot for a grace period before being dropped.

use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc;
use wave_core::events::{LeaveReason, ServerEvent};
use wave_core::player::PlayerStatus;
use wave_core::room::{Room, RoomId, RoomStatus};

use crate::error::ApiError;
use crate::lifecycle;
use crate::state::AppState;

/// Bind a socket's outbound channel to a room member. Returns the connection
/// id (used to guard the matching detach) and a state snapshot to send as
/// the first frame. An existing channel for the same wallet is displaced.
pub async fn attach(
    state: &AppState,
    room_id: &RoomId,
    wallet_id: &str,
    sender: mpsc::Sender<Utf8Bytes>,
) -> Result<(u64, Room), ApiError> {
    let handle = state
        .registry
        .get(room_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("room {room_id} not found")))?;
    let mut entry = handle.entry.lock().await;
    if entry.room.status == RoomStatus::Finished {
        return Err(ApiError::Gone("room is finished".into()));
    }
    if entry.room.player(wallet_id).is_none() {
        return Err(ApiError::NotAuthorized(format!(
            "player {wallet_id} has not joined this room"
        )));
    }

    let conn_id = state.registry.next_conn_id();
    let displaced = entry
        .connections
        .insert(
            wallet_id.to_string(),
            crate::registry::Connection::new(conn_id, sender),
        )
        .is_some();
    if displaced {
        tracing::debug!(room_id = %room_id, wallet = %wallet_id, "Displaced previous channel");
    }

    entry.cancel_grace(wallet_id);
    let was_disconnected = entry
        .room
        .player(wallet_id)
        .is_some_and(|p| p.status == PlayerStatus::Disconnected);
    if was_disconnected {
        if let Some(player) = entry.room.player_mut(wallet_id) {
            player.status = PlayerStatus::Active;
        }
        entry.broadcast_except(
            wallet_id,
            &ServerEvent::PlayerReconnected {
                wallet_id: wallet_id.to_string(),
            },
        );
        tracing::info!(room_id = %room_id, wallet = %wallet_id, "Player reconnected");
    }

    Ok((conn_id, entry.room.clone()))
}

/// Tear down a channel when its socket closes. A detach whose connection id
/// has been superseded by a newer attach is ignored, so a slow teardown of
/// an old socket cannot knock out a fresh reconnect.
pub async fn detach(state: &AppState, room_id: &RoomId, wallet_id: &str, conn_id: u64) {
    let Some(handle) = state.registry.get(room_id).await else {
        return;
    };
    let mut entry = handle.entry.lock().await;
    // A newer attach owns the slot; only that channel's own teardown (or a
    // teardown after the entry was already pruned as dead) proceeds.
    if let Some(conn) = entry.connections.get(wallet_id)
        && conn.conn_id != conn_id
    {
        return;
    }
    entry.connections.remove(wallet_id);

    if entry.room.status == RoomStatus::Finished || entry.room.player(wallet_id).is_none() {
        return;
    }
    if let Some(player) = entry.room.player_mut(wallet_id) {
        player.status = PlayerStatus::Disconnected;
    }
    entry.broadcast(&ServerEvent::PlayerDisconnected {
        wallet_id: wallet_id.to_string(),
    });
    tracing::info!(room_id = %room_id, wallet = %wallet_id, "Player disconnected, grace started");

    // Grace timer: if no reconnect lands before it fires, the player is
    // treated as having left. Guarded by connection state rather than the
    // room epoch so mid-game transitions do not cancel it.
    let grace = Duration::from_secs(state.config.rooms.disconnect_grace_secs);
    let state_clone = state.clone();
    let room_id = *room_id;
    let wallet = wallet_id.to_string();
    let timer = tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        let Some(handle) = state_clone.registry.get(&room_id).await else {
            return;
        };
        let mut entry = handle.entry.lock().await;
        let still_gone = entry
            .room
            .player(&wallet)
            .is_some_and(|p| p.status == PlayerStatus::Disconnected)
            && !entry.connections.contains_key(&wallet);
        if !still_gone {
            return;
        }
        entry.grace_timers.remove(&wallet);
        tracing::info!(room_id = %room_id, wallet = %wallet, "Grace period expired");
        lifecycle::remove_player_locked(
            &state_clone,
            &handle,
            &mut entry,
            &wallet,
            LeaveReason::TimedOut,
        )
        .await;
    });
    entry.cancel_grace(wallet_id);
    entry.grace_timers.insert(wallet_id.to_string(), timer);
}
