use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::errors::ApiError;
use crate::state::AppState;

const SESSION_REPLAY_LIMIT: i64 = 500;

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.history.list_recent().await?;
    Ok(Json(json!({ "sessions": sessions })))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .history
        .get_session(&session_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("session {session_id}")))?;

    let messages = state
        .history
        .get_messages(&session_id, SESSION_REPLAY_LIMIT)
        .await?;

    Ok(Json(json!({ "session": session, "messages": messages })))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.history.delete_session(&session_id).await? {
        return Err(ApiError::NotFound(format!("session {session_id}")));
    }
    Ok(Json(json!({ "message": "Deleted" })))
}
