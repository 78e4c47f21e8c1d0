use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::{
    extractors::ValidJson,
    handlers::ApiError,
    middlewares::auth::AuthSession,
    models::chat::ChatWidgetRequest,
    services::{registry::SlotKey, AppState},
};

/// POST /api/v1/chat
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AuthSession>,
    ValidJson(req): ValidJson<ChatWidgetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state
        .chat
        .send_message(&session.token, session.user_id(), req)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// GET /api/v1/chat/{test_id}/{question_id}
pub async fn get_chat(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AuthSession>,
    Path((test_id, question_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let key = SlotKey::new(session.user_id(), test_id, question_id);
    let snapshot = state
        .chat
        .state(&key)
        .await
        .ok_or_else(|| ApiError::not_found("No chat message sent for this question"))?;

    Ok(Json(snapshot))
}

/// GET /api/v1/chat/{test_id}/{question_id}/history
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AuthSession>,
    Path((test_id, question_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let key = SlotKey::new(session.user_id(), test_id, question_id);
    let history = state
        .chat
        .history(&session.token, &key)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load chat history: {:?}", e);
            ApiError::BadGateway(e.to_string())
        })?;

    Ok(Json(json!({ "chat_history": history })))
}

/// DELETE /api/v1/chat/{test_id}/{question_id}
pub async fn cancel_chat(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AuthSession>,
    Path((test_id, question_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let key = SlotKey::new(session.user_id(), test_id, question_id);
    if state.chat.cancel(&key).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("No chat message sent for this question"))
    }
}
