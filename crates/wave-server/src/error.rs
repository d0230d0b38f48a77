use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Error taxonomy for the REST facade. Each variant maps to a fixed HTTP
/// status so clients can branch on class rather than message text.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed or out-of-range input.
    Validation(String),
    /// Room or player does not exist.
    NotFound(String),
    /// The operation conflicts with current room state (full, wrong phase).
    Conflict(String),
    /// Caller lacks the role required for the operation.
    NotAuthorized(String),
    /// The request references a round or question that has already moved on.
    StaleRequest(String),
    /// The room is finished and no longer accepts this operation.
    Gone(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Validation(msg) => write!(f, "validation error: {msg}"),
            ApiError::NotFound(msg) => write!(f, "not found: {msg}"),
            ApiError::Conflict(msg) => write!(f, "conflict: {msg}"),
            ApiError::NotAuthorized(msg) => write!(f, "not authorized: {msg}"),
            ApiError::StaleRequest(msg) => write!(f, "stale request: {msg}"),
            ApiError::Gone(msg) => write!(f, "gone: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::NotAuthorized(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::StaleRequest(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Gone(msg) => (StatusCode::GONE, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
