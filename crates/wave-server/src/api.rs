//! REST facade over the room registry and lifecycle controller. Everything
//! here is thin: validate, delegate, shape the response.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use wave_core::room::{Room, RoomId, RoomSettings, is_valid_room_code};

use crate::error::ApiError;
use crate::lifecycle;
use crate::state::AppState;

const MAX_USERNAME_LEN: usize = 32;

fn validate_identity(wallet_id: &str, username: &str) -> Result<(), ApiError> {
    if wallet_id.trim().is_empty() {
        return Err(ApiError::Validation("walletId must not be empty".into()));
    }
    if username.trim().is_empty() {
        return Err(ApiError::Validation("username must not be empty".into()));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(ApiError::Validation(format!(
            "username over {MAX_USERNAME_LEN} characters"
        )));
    }
    Ok(())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub host_wallet_id: String,
    pub host_username: String,
    #[serde(default)]
    pub settings: Option<RoomSettings>,
}

pub async fn create_room(
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<Room>), ApiError> {
    validate_identity(&req.host_wallet_id, &req.host_username)?;
    let settings = req.settings.unwrap_or_default();
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
        .create_room(&req.host_wallet_id, &req.host_username, settings)
        .await;
    let room = handle.entry.lock().await.room.clone();
    Ok((StatusCode::CREATED, Json(room)))
}

#[derive(Deserialize)]
pub struct ListRoomsQuery {
    #[serde(default)]
    pub status: Option<String>,
}

pub async fn list_rooms(
    State(state): State<AppState>,
    Query(query): Query<ListRoomsQuery>,
) -> Result<Json<Vec<Room>>, ApiError> {
    match query.status.as_deref() {
        None | Some("waiting") => Ok(Json(state.registry.list_waiting().await)),
        Some(other) => Err(ApiError::Validation(format!(
            "unsupported status filter: {other}"
        ))),
    }
}

pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<Room>, ApiError> {
    let handle = state
        .registry
        .get(&room_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("room {room_id} not found")))?;
    let room = handle.entry.lock().await.room.clone();
    Ok(Json(room))
}

pub async fn get_room_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Room>, ApiError> {
    let code = code.to_uppercase();
    if !is_valid_room_code(&code) {
        return Err(ApiError::Validation(format!("malformed room code {code}")));
    }
    let handle = state
        .registry
        .get_by_code(&code)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no room with code {code}")))?;
    let room = handle.entry.lock().await.room.clone();
    Ok(Json(room))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub wallet_id: String,
    pub username: String,
    #[serde(default)]
    pub room_id: Option<RoomId>,
    #[serde(default)]
    pub room_code: Option<String>,
}

/// Join by id or by code; exactly one of the two must be present.
pub async fn join_room(
    State(state): State<AppState>,
    Json(req): Json<JoinRoomRequest>,
) -> Result<Json<Room>, ApiError> {
    validate_identity(&req.wallet_id, &req.username)?;
    let room = match (req.room_id, req.room_code) {
        (Some(room_id), None) => {
            lifecycle::join_room(&state, &room_id, &req.wallet_id, &req.username).await?
        },
        (None, Some(code)) => {
            lifecycle::join_room_by_code(&state, &code.to_uppercase(), &req.wallet_id, &req.username)
                .await?
        },
        _ => {
            return Err(ApiError::Validation(
                "provide exactly one of roomId or roomCode".into(),
            ));
        },
    };
    Ok(Json(room))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoomRequest {
    pub room_id: RoomId,
    pub wallet_id: String,
}

pub async fn leave_room(
    State(state): State<AppState>,
    Json(req): Json<LeaveRoomRequest>,
) -> Result<StatusCode, ApiError> {
    lifecycle::leave_room(&state, &req.room_id, &req.wallet_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsRequest {
    pub actor_wallet_id: String,
    pub settings: RoomSettings,
}

pub async fn update_settings(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<Json<Room>, ApiError> {
    let room =
        lifecycle::update_settings(&state, &room_id, &req.actor_wallet_id, req.settings).await?;
    Ok(Json(room))
}

#[derive(Deserialize)]
pub struct PlayerStatusRequest {
    pub status: String,
}

/// `"ready"` marks the player ready; `"active"` clears the flag.
pub async fn set_player_status(
    State(state): State<AppState>,
    Path((room_id, wallet_id)): Path<(RoomId, String)>,
    Json(req): Json<PlayerStatusRequest>,
) -> Result<StatusCode, ApiError> {
    let is_ready = match req.status.as_str() {
        "ready" => true,
        "active" => false,
        other => {
            return Err(ApiError::Validation(format!(
                "unknown status {other}, expected ready or active"
            )));
        },
    };
    lifecycle::set_ready(&state, &room_id, &wallet_id, is_ready).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attest::LogRewardSink;
    use crate::config::ServerConfig;
    use crate::questions::QuestionBank;
    use std::path::Path as FsPath;
    use std::sync::Arc;
    use wave_core::room::RoomStatus;

    fn test_state() -> AppState {
        let questions = QuestionBank::load_or_default(FsPath::new("/nonexistent"));
        AppState::new(ServerConfig::default(), questions, Arc::new(LogRewardSink))
    }

    fn create_req(wallet: &str) -> CreateRoomRequest {
        CreateRoomRequest {
            host_wallet_id: wallet.to_string(),
            host_username: "host".to_string(),
            settings: None,
        }
    }

    #[tokio::test]
    async fn create_room_returns_201_with_snapshot() {
        let state = test_state();
        let (status, Json(room)) = create_room(State(state), Json(create_req("0xhost")))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(room.host_wallet_id, "0xhost");
        assert_eq!(room.status, RoomStatus::Waiting);
        assert!(is_valid_room_code(&room.code));
    }

    #[tokio::test]
    async fn create_room_rejects_blank_identity() {
        let state = test_state();
        let result = create_room(State(state), Json(create_req("  "))).await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn create_room_rejects_zero_question_settings() {
        let state = test_state();
        let req = CreateRoomRequest {
            settings: Some(RoomSettings {
                easy_questions: 0,
                medium_questions: 0,
                hard_questions: 0,
                seconds_per_question: 15,
            }),
            ..create_req("0xhost")
        };
        let result = create_room(State(state), Json(req)).await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn join_by_code_is_case_insensitive() {
        let state = test_state();
        let (_, Json(room)) = create_room(State(state.clone()), Json(create_req("0xhost")))
            .await
            .unwrap();
        let req = JoinRoomRequest {
            wallet_id: "0xa".into(),
            username: "alice".into(),
            room_id: None,
            room_code: Some(room.code.to_lowercase()),
        };
        let Json(joined) = join_room(State(state), Json(req)).await.unwrap();
        assert_eq!(joined.players.len(), 2);
    }

    #[tokio::test]
    async fn join_requires_exactly_one_locator() {
        let state = test_state();
        let req = JoinRoomRequest {
            wallet_id: "0xa".into(),
            username: "alice".into(),
            room_id: None,
            room_code: None,
        };
        let result = join_room(State(state), Json(req)).await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn list_rooms_rejects_unknown_filter() {
        let state = test_state();
        let result = list_rooms(
            State(state),
            Query(ListRoomsQuery {
                status: Some("haunted".into()),
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn get_room_by_code_validates_format() {
        let state = test_state();
        let result = get_room_by_code(State(state), Path("notacode".into())).await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn player_status_toggles_ready() {
        let state = test_state();
        let (_, Json(room)) = create_room(State(state.clone()), Json(create_req("0xhost")))
            .await
            .unwrap();
        let join = JoinRoomRequest {
            wallet_id: "0xa".into(),
            username: "alice".into(),
            room_id: Some(room.id),
            room_code: None,
        };
        let Json(_) = join_room(State(state.clone()), Json(join)).await.unwrap();

        let status = set_player_status(
            State(state.clone()),
            Path((room.id, "0xa".into())),
            Json(PlayerStatusRequest {
                status: "ready".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let Json(room) = get_room(State(state.clone()), Path(room.id)).await.unwrap();
        assert!(room.player("0xa").unwrap().is_ready);

        let result = set_player_status(
            State(state),
            Path((room.id, "0xa".into())),
            Json(PlayerStatusRequest {
                status: "asleep".into(),
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn leave_room_returns_204() {
        let state = test_state();
        let (_, Json(room)) = create_room(State(state.clone()), Json(create_req("0xhost")))
            .await
            .unwrap();
        let status = leave_room(
            State(state),
            Json(LeaveRoomRequest {
                room_id: room.id,
                wallet_id: "0xhost".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
}
