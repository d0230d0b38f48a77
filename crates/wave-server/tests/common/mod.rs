//! Shared harness for integration tests: boots the full app on an ephemeral
//! port and offers REST and WebSocket helpers.

// Each suite uses a different subset of the helpers.
#![allow(dead_code)]

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use wave_core::events::{ClientEvent, ServerEvent, decode_server_event, encode_client_event};
use wave_core::room::Room;
use wave_server::build_app;
use wave_server::config::ServerConfig;
use wave_server::state::AppState;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub client: reqwest::Client,
}

/// Config with timers tightened so a whole game fits in a test run.
pub fn fast_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.rooms.start_countdown_secs = 0;
    config.rooms.inter_question_pause_secs = 0;
    config.rooms.lobby_countdown_secs = 600;
    config.rooms.disconnect_grace_secs = 600;
    config.rooms.heartbeat_interval_secs = 600;
    config
}

impl TestServer {
    pub async fn start(config: ServerConfig) -> Self {
        let (app, state) = build_app(config);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr").to_string();
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server run");
        });
        Self {
            addr,
            state,
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub async fn create_room(&self, host_wallet: &str, settings: serde_json::Value) -> Room {
        let resp = self
            .client
            .post(self.url("/rooms"))
            .json(&serde_json::json!({
                "hostWalletId": host_wallet,
                "hostUsername": format!("user-{host_wallet}"),
                "settings": settings,
            }))
            .send()
            .await
            .expect("create room");
        assert_eq!(resp.status(), 201, "create room failed");
        resp.json().await.expect("room body")
    }

    pub async fn join_room(&self, room: &Room, wallet: &str) -> Room {
        let resp = self
            .client
            .post(self.url("/join-room"))
            .json(&serde_json::json!({
                "walletId": wallet,
                "username": format!("user-{wallet}"),
                "roomId": room.id,
            }))
            .send()
            .await
            .expect("join room");
        assert_eq!(resp.status(), 200, "join failed");
        resp.json().await.expect("room body")
    }

    pub async fn set_ready(&self, room: &Room, wallet: &str) {
        let resp = self
            .client
            .post(self.url(&format!("/rooms/{}/player/{wallet}/status", room.id)))
            .json(&serde_json::json!({ "status": "ready" }))
            .send()
            .await
            .expect("set ready");
        assert_eq!(resp.status(), 204, "set ready failed");
    }

    pub async fn ws_connect(&self, room: &Room, wallet: &str) -> WsStream {
        let url = format!("ws://{}/ws/{}/{wallet}", self.addr, room.id);
        let (stream, _) = connect_async(url).await.expect("ws connect");
        stream
    }
}

pub async fn send_event(ws: &mut WsStream, event: &ClientEvent) {
    let text = encode_client_event(event).expect("encode");
    ws.send(Message::Text(text.into())).await.expect("ws send");
}

/// Read frames until one decodes to an event the predicate maps to `Some`.
/// Panics after five seconds without a match.
pub async fn expect_event<T>(ws: &mut WsStream, mut pred: impl FnMut(ServerEvent) -> Option<T>) -> T {
    let deadline = Duration::from_secs(5);
    loop {
        let frame = tokio::time::timeout(deadline, ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("ws error");
        let Message::Text(text) = frame else {
            continue;
        };
        let event = decode_server_event(text.as_str()).expect("decode server event");
        if let Some(out) = pred(event) {
            return out;
        }
    }
}

/// Convenience: wait for the initial snapshot frame.
pub async fn expect_snapshot(ws: &mut WsStream) -> Room {
    expect_event(ws, |event| match event {
        ServerEvent::RoomSnapshot { room } => Some(room),
        _ => None,
    })
    .await
}
