//! WebSocket endpoint: one socket per (room, wallet). Inbound frames are
//! decoded, rate limited, and dispatched; outbound events arrive through the
//! per-connection channel installed at attach.

use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use wave_core::events::{ClientEvent, ServerEvent, decode_client_event, encode_server_event};
use wave_core::room::RoomId;

use crate::channels;
use crate::error::ApiError;
use crate::lifecycle;
use crate::round;
use crate::state::AppState;

/// Token bucket over inbound frames. Bursts up to one second's allowance.
struct RateLimiter {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl RateLimiter {
    fn new(rate_per_sec: f64) -> Self {
        let capacity = rate_per_sec.max(1.0);
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec: rate_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn allow(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Path((room_id, wallet_id)): Path<(RoomId, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    let current = state.ws_connection_count.load(Ordering::SeqCst);
    if current >= state.config.limits.max_ws_connections {
        tracing::warn!(current, "WebSocket connection cap reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "server at capacity").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, room_id, wallet_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, room_id: RoomId, wallet_id: String) {
    state.ws_connection_count.fetch_add(1, Ordering::SeqCst);
    let (mut sink, mut stream) = socket.split();

    let (tx, mut rx) = mpsc::channel::<Utf8Bytes>(state.config.limits.player_message_buffer);
    let (conn_id, snapshot) = match channels::attach(&state, &room_id, &wallet_id, tx.clone()).await
    {
        Ok(ok) => ok,
        Err(e) => {
            tracing::debug!(room_id = %room_id, wallet = %wallet_id, error = %e, "Attach refused");
            send_event(&mut sink, &ServerEvent::Error {
                message: e.to_string(),
            })
            .await;
            let _ = sink.close().await;
            state.ws_connection_count.fetch_sub(1, Ordering::SeqCst);
            return;
        },
    };

    // First frame on every channel is the full state snapshot. The local
    // sender is dropped afterwards so the registry's connection entry is the
    // only one left: removing it (kick, displacement) closes the socket.
    queue_event(&tx, &ServerEvent::RoomSnapshot { room: snapshot }).await;
    drop(tx);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut limiter = RateLimiter::new(state.config.limits.ws_rate_limit_per_sec);
    let idle_timeout = Duration::from_secs(state.config.rooms.heartbeat_interval_secs * 2);

    loop {
        let msg = match tokio::time::timeout(idle_timeout, stream.next()).await {
            Err(_) => {
                tracing::debug!(room_id = %room_id, wallet = %wallet_id, "Channel idle, closing");
                break;
            },
            Ok(None) => break,
            Ok(Some(Err(_))) => break,
            Ok(Some(Ok(msg))) => msg,
        };
        match msg {
            Message::Text(text) => {
                if !limiter.allow() {
                    unicast(&state, &room_id, &wallet_id, &ServerEvent::Error {
                        message: "rate limit exceeded".into(),
                    })
                    .await;
                    continue;
                }
                if !dispatch(&state, &room_id, &wallet_id, text.as_str()).await {
                    break;
                }
            },
            Message::Close(_) => break,
            // Protocol-level ping/pong is handled by the ws stack.
            _ => {},
        }
    }

    channels::detach(&state, &room_id, &wallet_id, conn_id).await;
    writer.abort();
    state.ws_connection_count.fetch_sub(1, Ordering::SeqCst);
    tracing::debug!(room_id = %room_id, wallet = %wallet_id, "Channel closed");
}

/// Handle one inbound frame. Returns false when the loop should exit.
async fn dispatch(state: &AppState, room_id: &RoomId, wallet_id: &str, text: &str) -> bool {
    let event = match decode_client_event(text) {
        Ok(event) => event,
        Err(e) => {
            unicast(state, room_id, wallet_id, &ServerEvent::Error {
                message: format!("bad frame: {e}"),
            })
            .await;
            return true;
        },
    };

    let result = match event {
        ClientEvent::Ping => {
            unicast(state, room_id, wallet_id, &ServerEvent::Pong).await;
            Ok(())
        },
        ClientEvent::Chat { message } => send_chat(state, room_id, wallet_id, message).await,
        ClientEvent::SubmitAnswer {
            question_index,
            option,
            response_time_ms: _,
        } => round::submit_answer(state, room_id, wallet_id, question_index, option).await,
        ClientEvent::StartGame => lifecycle::start_game(state, room_id, wallet_id).await,
        ClientEvent::KickPlayer { target_wallet_id } => {
            lifecycle::kick_player(state, room_id, wallet_id, &target_wallet_id).await
        },
        ClientEvent::LeaveRoom => {
            let _ = lifecycle::leave_room(state, room_id, wallet_id).await;
            return false;
        },
    };

    if let Err(e) = result {
        unicast(state, room_id, wallet_id, &ServerEvent::Error {
            message: e.to_string(),
        })
        .await;
    }
    true
}

/// Push an event to one player's channel, if they still have one.
async fn unicast(state: &AppState, room_id: &RoomId, wallet_id: &str, event: &ServerEvent) {
    if let Some(handle) = state.registry.get(room_id).await {
        let mut entry = handle.entry.lock().await;
        entry.send_to(wallet_id, event);
    }
}

async fn send_chat(
    state: &AppState,
    room_id: &RoomId,
    wallet_id: &str,
    message: String,
) -> Result<(), ApiError> {
    let message = message.trim().to_string();
    if message.is_empty() {
        return Err(ApiError::Validation("empty chat message".into()));
    }
    if message.len() > state.config.limits.max_chat_len {
        return Err(ApiError::Validation(format!(
            "chat message over {} bytes",
            state.config.limits.max_chat_len
        )));
    }
    if message.chars().any(char::is_control) {
        return Err(ApiError::Validation(
            "chat message contains control characters".into(),
        ));
    }
    let handle = state
        .registry
        .get(room_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("room {room_id} not found")))?;
    let mut entry = handle.entry.lock().await;
    let sender = entry
        .room
        .player(wallet_id)
        .map(|p| p.username.clone())
        .ok_or_else(|| ApiError::NotFound(format!("player {wallet_id} not in room")))?;
    entry.broadcast(&ServerEvent::Chat { sender, message });
    Ok(())
}

async fn queue_event(tx: &mpsc::Sender<Utf8Bytes>, event: &ServerEvent) {
    match encode_server_event(event) {
        Ok(text) => {
            let _ = tx.send(Utf8Bytes::from(text)).await;
        },
        Err(e) => tracing::error!(error = %e, "Failed to encode outbound event"),
    }
}

async fn send_event(
    sink: &mut (impl SinkExt<Message> + Unpin),
    event: &ServerEvent,
) {
    if let Ok(text) = encode_server_event(event) {
        let _ = sink.send(Message::Text(Utf8Bytes::from(text))).await;
    }
}
