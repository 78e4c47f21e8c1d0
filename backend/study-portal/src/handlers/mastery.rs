use axum::{
    extract::{Extension, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::{middlewares::auth::AuthSession, services::AppState};

#[derive(Debug, Default, Deserialize)]
pub struct MasteryQuery {
    pub study_guide_id: Option<String>,
}

/// GET /api/v1/mastery?study_guide_id=
pub async fn get_mastery(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AuthSession>,
    Query(query): Query<MasteryQuery>,
) -> impl IntoResponse {
    let study_guide_id = query.study_guide_id.as_deref().filter(|id| !id.is_empty());
    tracing::info!(
        "Loading mastery: user={}, study_guide={:?}",
        session.user_id(),
        study_guide_id
    );

    let view = state
        .mastery
        .overview(&session.token, session.user_id(), study_guide_id)
        .await;

    Json(view)
}
