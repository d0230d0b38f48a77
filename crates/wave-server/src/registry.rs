use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Utf8Bytes;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use wave_core::events::{ServerEvent, encode_server_event};
use wave_core::player::{Player, PlayerStatus};
use wave_core::question::{AnswerRecord, Question};
use wave_core::room::{Room, RoomId, RoomSettings, RoomStatus, generate_room_code};
use wave_core::time::epoch_millis;

pub type WalletId = String;

/// A live outbound channel to one player's socket. `conn_id` distinguishes
/// connection attempts so a stale socket's teardown cannot evict a newer one.
pub struct Connection {
    pub conn_id: u64,
    sender: mpsc::Sender<Utf8Bytes>,
}

impl Connection {
    pub fn new(conn_id: u64, sender: mpsc::Sender<Utf8Bytes>) -> Self {
        Self { conn_id, sender }
    }
}

/// Per-question and per-game state while a room is in progress.
pub struct RoundState {
    pub deck: Vec<Question>,
    pub current_index: usize,
    /// Epoch millis when the current question was broadcast.
    pub question_sent_at: u64,
    pub deadline_task: Option<JoinHandle<()>>,
    /// Answers received for the current question only.
    pub answers: HashMap<WalletId, AnswerRecord>,
    /// Ranks after the previous question, for leaderboard deltas.
    pub prev_ranks: HashMap<WalletId, usize>,
}

impl RoundState {
    pub fn new(deck: Vec<Question>) -> Self {
        Self {
            deck,
            current_index: 0,
            question_sent_at: 0,
            deadline_task: None,
            answers: HashMap::new(),
            prev_ranks: HashMap::new(),
        }
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.deck.get(self.current_index)
    }
}

/// All mutable state for one room, guarded by the handle's mutex. Every
/// mutation of the room, its connections, or its timers happens under this
/// one lock, so observers never see a partially applied transition.
pub struct RoomEntry {
    pub room: Room,
    pub connections: HashMap<WalletId, Connection>,
    /// Pending disconnect-grace timers keyed by wallet.
    pub grace_timers: HashMap<WalletId, JoinHandle<()>>,
    /// The armed lobby or start countdown, if any.
    pub countdown_task: Option<JoinHandle<()>>,
    pub round: Option<RoundState>,
    /// Bumped on every state transition that invalidates outstanding timers.
    /// A timer that fires re-checks the epoch it captured and no-ops when
    /// the room has moved on.
    pub epoch: u64,
    pub finished_at: Option<u64>,
}

impl RoomEntry {
    fn new(room: Room) -> Self {
        Self {
            room,
            connections: HashMap::new(),
            grace_timers: HashMap::new(),
            countdown_task: None,
            round: None,
            epoch: 0,
            finished_at: None,
        }
    }

    /// Invalidate all outstanding timers for this room.
    pub fn bump_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    pub fn cancel_countdown(&mut self) {
        if let Some(task) = self.countdown_task.take() {
            task.abort();
        }
    }

    pub fn cancel_grace(&mut self, wallet_id: &str) {
        if let Some(task) = self.grace_timers.remove(wallet_id) {
            task.abort();
        }
    }

    pub fn cancel_deadline(&mut self) {
        if let Some(round) = self.round.as_mut()
            && let Some(task) = round.deadline_task.take()
        {
            task.abort();
        }
    }

    /// Send an event to every connected player. Channels that have been
    /// closed or are full get pruned so dead sockets do not accumulate.
    pub fn broadcast(&mut self, event: &ServerEvent) {
        self.broadcast_filtered(event, |_| true);
    }

    /// Broadcast to everyone except one wallet.
    pub fn broadcast_except(&mut self, skip_wallet: &str, event: &ServerEvent) {
        self.broadcast_filtered(event, |wallet| wallet != skip_wallet);
    }

    fn broadcast_filtered(&mut self, event: &ServerEvent, keep: impl Fn(&str) -> bool) {
        let text = match encode_server_event(event) {
            Ok(text) => Utf8Bytes::from(text),
            Err(e) => {
                tracing::error!(room_id = %self.room.id, error = %e, "Failed to encode event");
                return;
            },
        };
        let mut dead: Vec<WalletId> = Vec::new();
        for (wallet, conn) in &self.connections {
            if !keep(wallet) {
                continue;
            }
            if conn.sender.try_send(text.clone()).is_err() {
                dead.push(wallet.clone());
            }
        }
        for wallet in dead {
            tracing::debug!(room_id = %self.room.id, wallet = %wallet, "Pruning dead connection");
            self.connections.remove(&wallet);
        }
    }

    /// Send an event to a single player, if connected. Returns whether the
    /// frame was handed to the channel.
    pub fn send_to(&mut self, wallet_id: &str, event: &ServerEvent) -> bool {
        let text = match encode_server_event(event) {
            Ok(text) => Utf8Bytes::from(text),
            Err(e) => {
                tracing::error!(room_id = %self.room.id, error = %e, "Failed to encode event");
                return false;
            },
        };
        match self.connections.get(wallet_id) {
            Some(conn) if conn.sender.try_send(text).is_ok() => true,
            Some(_) => {
                self.connections.remove(wallet_id);
                false
            },
            None => false,
        }
    }

    /// Count of players still marked active (not in disconnect grace).
    pub fn active_player_count(&self) -> usize {
        self.room
            .players
            .iter()
            .filter(|p| p.status == PlayerStatus::Active)
            .count()
    }
}

/// Shared handle to one room. The registry hands out `Arc`s of these so
/// callers can release the registry maps before locking the entry.
pub struct RoomHandle {
    pub id: RoomId,
    pub entry: Mutex<RoomEntry>,
}

/// The set of all live rooms. The outer maps are only held long enough to
/// look up, insert, or remove a handle; room mutation goes through the
/// per-room mutex. Lock order is maps before entry, never the reverse.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomId, Arc<RoomHandle>>>,
    codes: RwLock<HashMap<String, RoomId>>,
    next_conn_id: AtomicU64,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            codes: RwLock::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
        }
    }

    pub fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Create a room with the given host and settings. The join code is
    /// drawn randomly and retried until unique among live rooms.
    pub async fn create_room(
        &self,
        host_wallet_id: &str,
        host_username: &str,
        settings: RoomSettings,
    ) -> Arc<RoomHandle> {
        let code = {
            let mut codes = self.codes.write().await;
            let code = loop {
                let candidate = generate_room_code();
                if !codes.contains_key(&candidate) {
                    break candidate;
                }
            };
            // Reserve before the room map insert so a concurrent create
            // cannot draw the same code.
            codes.insert(code.clone(), RoomId::nil());
            code
        };

        let host = Player::new(host_wallet_id, host_username, true);
        let room_id = RoomId::new_v4();
        let room = Room::new(room_id, code.clone(), host, settings);
        let handle = Arc::new(RoomHandle {
            id: room_id,
            entry: Mutex::new(RoomEntry::new(room)),
        });

        self.rooms.write().await.insert(room_id, Arc::clone(&handle));
        self.codes.write().await.insert(code.clone(), room_id);

        tracing::info!(room_id = %room_id, code = %code, host = %host_wallet_id, "Room created");
        handle
    }

    pub async fn get(&self, room_id: &RoomId) -> Option<Arc<RoomHandle>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    pub async fn get_by_code(&self, code: &str) -> Option<Arc<RoomHandle>> {
        let id = {
            let codes = self.codes.read().await;
            codes.get(&code.to_uppercase()).copied()?
        };
        self.rooms.read().await.get(&id).cloned()
    }

    /// Snapshot every room currently accepting players.
    pub async fn list_waiting(&self) -> Vec<Room> {
        let handles: Vec<Arc<RoomHandle>> = self.rooms.read().await.values().cloned().collect();
        let mut out = Vec::new();
        for handle in handles {
            let entry = handle.entry.lock().await;
            if entry.room.status == RoomStatus::Waiting && !entry.room.is_full() {
                out.push(entry.room.clone());
            }
        }
        out
    }

    /// Free a join code so it can be reissued. Called when a room finishes.
    pub async fn release_code(&self, code: &str) {
        self.codes.write().await.remove(code);
    }

    /// Drop a room from the registry. The handle stays alive for any
    /// in-flight callers holding an `Arc`, but new lookups will miss.
    pub async fn remove(&self, room_id: &RoomId) {
        let removed = self.rooms.write().await.remove(room_id);
        if let Some(handle) = removed {
            let code = {
                let entry = handle.entry.lock().await;
                entry.room.code.clone()
            };
            // The code may already have been released and reissued to a
            // newer room; only drop the mapping if it is still ours.
            let mut codes = self.codes.write().await;
            if codes.get(&code) == Some(room_id) {
                codes.remove(&code);
            }
            tracing::info!(room_id = %room_id, "Room removed");
        }
    }

    /// (room count, connected player count) for health reporting.
    pub async fn stats(&self) -> (usize, usize) {
        let handles: Vec<Arc<RoomHandle>> = self.rooms.read().await.values().cloned().collect();
        let room_count = handles.len();
        let mut players = 0;
        for handle in handles {
            let entry = handle.entry.lock().await;
            players += entry.connections.len();
        }
        (room_count, players)
    }

    /// Remove finished rooms older than `ttl_ms`. Returns how many were
    /// reaped.
    pub async fn reap_finished(&self, ttl_ms: u64) -> usize {
        let handles: Vec<Arc<RoomHandle>> = self.rooms.read().await.values().cloned().collect();
        let now = epoch_millis();
        let mut expired = Vec::new();
        for handle in handles {
            let entry = handle.entry.lock().await;
            if let Some(finished_at) = entry.finished_at
                && now.saturating_sub(finished_at) >= ttl_ms
            {
                expired.push(handle.id);
            }
        }
        let count = expired.len();
        for id in expired {
            self.remove(&id).await;
        }
        count
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
