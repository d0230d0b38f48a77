use serde::Deserialize;

/// Top-level server configuration, loaded from `wave.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Path to the question bank; falls back to the built-in set when absent.
    pub questions_path: String,
    pub limits: LimitsConfig,
    pub rooms: RoomPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            questions_path: "questions.toml".to_string(),
            limits: LimitsConfig::default(),
            rooms: RoomPolicy::default(),
        }
    }
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    /// Bound of each player's outbound event channel; slow clients drop frames.
    pub player_message_buffer: usize,
    pub ws_rate_limit_per_sec: f64,
    pub max_chat_len: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 200,
            player_message_buffer: 64,
            ws_rate_limit_per_sec: 20.0,
            max_chat_len: 500,
        }
    }
}

/// Room lifecycle timing and membership policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomPolicy {
    /// Auto-start timer armed once enough players are in the lobby.
    pub lobby_countdown_secs: u64,
    /// Delay between `game_started` and the first question.
    pub start_countdown_secs: u64,
    /// Pause between a question result and the next question.
    pub inter_question_pause_secs: u64,
    /// How long a disconnected player's slot is held before they are
    /// treated as having left.
    pub disconnect_grace_secs: u64,
    /// Expected client keep-alive cadence; a channel silent for twice this
    /// interval is treated as disconnected.
    pub heartbeat_interval_secs: u64,
    /// How long a finished room remains queryable before being reaped.
    pub finished_room_ttl_secs: u64,
    pub reap_interval_secs: u64,
}

impl Default for RoomPolicy {
    fn default() -> Self {
        Self {
            lobby_countdown_secs: 180,
            start_countdown_secs: 5,
            inter_question_pause_secs: 5,
            disconnect_grace_secs: 60,
            heartbeat_interval_secs: 30,
            finished_room_ttl_secs: 300,
            reap_interval_secs: 60,
        }
    }
}

impl ServerConfig {
    /// Validate configuration, exiting on values the server cannot run with.
    pub fn validate(&self) {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            tracing::error!(
                addr = %self.listen_addr,
                "listen_addr is not a valid socket address"
            );
            std::process::exit(1);
        }
        if self.limits.max_ws_connections == 0 {
            tracing::error!("limits.max_ws_connections must be > 0");
            std::process::exit(1);
        }
        if self.limits.player_message_buffer == 0 {
            tracing::error!("limits.player_message_buffer must be > 0");
            std::process::exit(1);
        }
        if self.limits.ws_rate_limit_per_sec <= 0.0 {
            tracing::error!("limits.ws_rate_limit_per_sec must be > 0");
            std::process::exit(1);
        }
        if self.rooms.lobby_countdown_secs == 0 {
            tracing::error!("rooms.lobby_countdown_secs must be > 0");
            std::process::exit(1);
        }
        if self.rooms.disconnect_grace_secs == 0 {
            tracing::error!("rooms.disconnect_grace_secs must be > 0");
            std::process::exit(1);
        }
        if self.rooms.heartbeat_interval_secs == 0 {
            tracing::error!("rooms.heartbeat_interval_secs must be > 0");
            std::process::exit(1);
        }
        if self.rooms.reap_interval_secs == 0 {
            tracing::error!("rooms.reap_interval_secs must be > 0");
            std::process::exit(1);
        }
    }

    /// Load config from `wave.toml` if it exists, then apply env overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("wave.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from wave.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse wave.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No wave.toml found, using defaults");
                ServerConfig::default()
            },
        };

        if let Ok(addr) = std::env::var("WAVE_LISTEN_ADDR")
            && !addr.is_empty()
        {
            config.listen_addr = addr;
        }
        if let Ok(path) = std::env::var("WAVE_QUESTIONS_PATH")
            && !path.is_empty()
        {
            config.questions_path = path;
        }
        if let Ok(val) = std::env::var("WAVE_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            config.limits.max_ws_connections = n;
        }
        if let Ok(val) = std::env::var("WAVE_WS_RATE_LIMIT")
            && let Ok(n) = val.parse::<f64>()
        {
            config.limits.ws_rate_limit_per_sec = n;
        }
        if let Ok(val) = std::env::var("WAVE_DISCONNECT_GRACE_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.rooms.disconnect_grace_secs = n;
        }

        config
    }
}
