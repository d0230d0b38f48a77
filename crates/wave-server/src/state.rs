use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use crate::attest::RewardSink;
use crate::config::ServerConfig;
use crate::questions::QuestionBank;
use crate::registry::RoomRegistry;

/// Shared application state threaded through every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub questions: Arc<QuestionBank>,
    pub config: Arc<ServerConfig>,
    pub rewards: Arc<dyn RewardSink>,
    /// Live WebSocket connection count, for the cap and health reporting.
    pub ws_connection_count: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        questions: QuestionBank,
        rewards: Arc<dyn RewardSink>,
    ) -> Self {
        Self {
            registry: Arc::new(RoomRegistry::new()),
            questions: Arc::new(questions),
            config: Arc::new(config),
            rewards,
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}
