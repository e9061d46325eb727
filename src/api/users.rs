//! Thin admin surface over user records. Every handler goes through the
//! policy registry; this is where authorization decisions actually get
//! enforced against a boundary.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState, actor::CurrentActor, types::UserDto};
use crate::authz::{Action, Resource};
use crate::services::RegisteredUser;

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub display_name: String,
}

#[derive(Deserialize)]
pub struct RoleRequest {
    pub role: String,
}

async fn lockout_minutes(state: &AppState) -> i64 {
    i64::from(state.shared.config.read().await.security.lockout_minutes)
}

/// GET /users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    actor: CurrentActor,
) -> Result<Json<ApiResponse<Vec<UserDto>>>, ApiError> {
    state.authorize(&actor.policy_actor(), &Resource::User(None), Action::List)?;

    let users = state.shared.store.list_users().await?;
    let window = lockout_minutes(&state).await;

    let mut dtos = Vec::with_capacity(users.len());
    for user in &users {
        let roles = state.shared.store.roles_for_user(user.id).await?;
        dtos.push(UserDto::from_user(user, roles, window));
    }

    Ok(Json(ApiResponse::success(dtos)))
}

/// GET /users/{id}
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    actor: CurrentActor,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<UserDto>>, ApiError> {
    let user = state
        .shared
        .store
        .get_user_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User", id))?;

    state.authorize(
        &actor.policy_actor(),
        &Resource::User(Some(&user)),
        Action::Show,
    )?;

    let roles = state.shared.store.roles_for_user(user.id).await?;
    let window = lockout_minutes(&state).await;

    Ok(Json(ApiResponse::success(UserDto::from_user(
        &user, roles, window,
    ))))
}

/// POST /users (admin creation; the public bootstrap path is /auth/register)
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    actor: CurrentActor,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RegisteredUser>>), ApiError> {
    state.authorize(&actor.policy_actor(), &Resource::User(None), Action::Create)?;

    let registered = state
        .shared
        .auth_service
        .register(&payload.email, &payload.password, &payload.display_name)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(registered))))
}

/// PUT /users/{id}
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    actor: CurrentActor,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<ApiResponse<UserDto>>, ApiError> {
    let user = state
        .shared
        .store
        .get_user_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User", id))?;

    state.authorize(
        &actor.policy_actor(),
        &Resource::User(Some(&user)),
        Action::Update,
    )?;

    if payload.display_name.trim().is_empty() {
        return Err(ApiError::validation("Display name cannot be empty"));
    }

    state
        .shared
        .store
        .user_repo()
        .update_display_name(id, payload.display_name.trim())
        .await?;

    let user = state
        .shared
        .store
        .get_user_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User", id))?;
    let roles = state.shared.store.roles_for_user(user.id).await?;
    let window = lockout_minutes(&state).await;

    Ok(Json(ApiResponse::success(UserDto::from_user(
        &user, roles, window,
    ))))
}

/// DELETE /users/{id}
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    actor: CurrentActor,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let user = state
        .shared
        .store
        .get_user_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User", id))?;

    state.authorize(
        &actor.policy_actor(),
        &Resource::User(Some(&user)),
        Action::Destroy,
    )?;

    state.shared.store.user_repo().delete(id).await?;

    tracing::info!(user_id = id, "User deleted");

    Ok(Json(ApiResponse::success(())))
}

/// POST /users/{id}/roles
pub async fn assign_role(
    State(state): State<Arc<AppState>>,
    actor: CurrentActor,
    Path(id): Path<i32>,
    Json(payload): Json<RoleRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state.authorize(&actor.policy_actor(), &Resource::Role, Action::Manage)?;

    state
        .shared
        .store
        .get_user_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User", id))?;

    state
        .shared
        .store
        .role_repo()
        .find_by_name(&payload.role)
        .await?
        .ok_or_else(|| ApiError::validation(format!("Unknown role: {}", payload.role)))?;

    state.shared.store.assign_role(id, &payload.role).await?;

    Ok(Json(ApiResponse::success(())))
}

/// DELETE /users/{id}/roles
pub async fn remove_role(
    State(state): State<Arc<AppState>>,
    actor: CurrentActor,
    Path(id): Path<i32>,
    Json(payload): Json<RoleRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state.authorize(&actor.policy_actor(), &Resource::Role, Action::Manage)?;

    state.shared.store.remove_role(id, &payload.role).await?;

    Ok(Json(ApiResponse::success(())))
}

/// POST /users/{id}/unlock — administrative override for a locked account.
pub async fn unlock_user(
    State(state): State<Arc<AppState>>,
    actor: CurrentActor,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let policy_actor = actor.policy_actor();
    state.authorize(&policy_actor, &Resource::User(None), Action::Manage)?;

    let user = state
        .shared
        .store
        .get_user_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User", id))?;

    state
        .shared
        .auth_service
        .unlock(&user.email, policy_actor.name())
        .await?;

    Ok(Json(ApiResponse::success(())))
}
