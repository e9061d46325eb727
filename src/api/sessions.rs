//! Device management: a user's view of their own active sessions.
//!
//! Creation is absent on purpose; only authentication opens sessions.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState, actor::CurrentActor, types::SessionDto};
use crate::authz::{Action, Resource};

#[derive(Serialize)]
pub struct TerminatedOthersResponse {
    pub terminated: u64,
}

/// GET /sessions
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    actor: CurrentActor,
) -> Result<Json<ApiResponse<Vec<SessionDto>>>, ApiError> {
    let user = actor
        .user()
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".to_string()))?;

    state.authorize(
        &actor.policy_actor(),
        &Resource::Session(Some(actor.session())),
        Action::List,
    )?;

    let sessions = state.shared.session_service.list_for_user(user.id).await?;

    let current_id = actor.session().id;
    let dtos = sessions
        .iter()
        .map(|s| SessionDto::from_session(s, current_id))
        .collect();

    Ok(Json(ApiResponse::success(dtos)))
}

/// DELETE /sessions/{id}
///
/// Refuses the current session (logout is the path for that) and reports
/// sessions owned by others as not found.
pub async fn terminate_session(
    State(state): State<Arc<AppState>>,
    actor: CurrentActor,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let user = actor
        .user()
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".to_string()))?;

    state.authorize(
        &actor.policy_actor(),
        &Resource::Session(Some(actor.session())),
        Action::Destroy,
    )?;

    state
        .shared
        .session_service
        .terminate_by_id(user.id, actor.session().id, id)
        .await?;

    Ok(Json(ApiResponse::success(())))
}

/// POST /sessions/terminate-others
pub async fn terminate_others(
    State(state): State<Arc<AppState>>,
    actor: CurrentActor,
) -> Result<Json<ApiResponse<TerminatedOthersResponse>>, ApiError> {
    let user = actor
        .user()
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".to_string()))?;

    state.authorize(
        &actor.policy_actor(),
        &Resource::Session(Some(actor.session())),
        Action::Destroy,
    )?;

    let terminated = state
        .shared
        .session_service
        .terminate_others(user.id, actor.session().id)
        .await?;

    Ok(Json(ApiResponse::success(TerminatedOthersResponse {
        terminated,
    })))
}
