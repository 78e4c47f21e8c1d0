use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::{
    extractors::ValidJson,
    handlers::ApiError,
    middlewares::auth::AuthSession,
    models::hint::HintWidgetRequest,
    services::{registry::SlotKey, AppState},
};

/// POST /api/v1/hints
pub async fn request_hint(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AuthSession>,
    ValidJson(req): ValidJson<HintWidgetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state
        .hints
        .request_hint(&session.token, session.user_id(), req)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// GET /api/v1/hints/{test_id}/{question_id}
pub async fn get_hint(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AuthSession>,
    Path((test_id, question_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let key = SlotKey::new(session.user_id(), test_id, question_id);
    let snapshot = state
        .hints
        .state(&key)
        .await
        .ok_or_else(|| ApiError::not_found("No hint requested for this question"))?;

    Ok(Json(snapshot))
}

/// DELETE /api/v1/hints/{test_id}/{question_id}
pub async fn cancel_hint(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AuthSession>,
    Path((test_id, question_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let key = SlotKey::new(session.user_id(), test_id, question_id);
    if state.hints.cancel(&key).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("No hint requested for this question"))
    }
}
