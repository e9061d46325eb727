use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_sessions::Session;

use super::{ApiError, ApiResponse, AppState, actor::CurrentActor, types::UserDto};
use crate::authz::{Action, PolicyActor, Resource};
use crate::crypto;
use crate::domain::SessionId;
use crate::services::{ClientInfo, RegisteredUser};

/// Key under which the transport-level credential store carries the session
/// id. Exactly one id round-trips per request; the session row itself never
/// leaves the database.
const SESSION_ID_KEY: &str = "session_id";

/// "Effectively indefinite": 400 days, the longest lifetime browsers honor.
/// Validity is enforced server-side by the 14-day rolling window.
const REMEMBER_COOKIE_MAX_AGE_SECONDS: i64 = 400 * 24 * 60 * 60;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember: bool,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub user: UserDto,
    pub session_id: i32,
    pub password_expired: bool,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Deserialize)]
pub struct ConfirmRequest {
    pub token: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// ============================================================================
// Middleware
// ============================================================================

/// Authentication middleware. Resolution order, first success wins:
/// 1. Session id already carried by the transport credential store
/// 2. Signed remember cookie (re-authenticates and rotates the token)
/// 3. Unauthenticated: 401, and any bad remember cookie is cleared
///
/// A resolved-but-terminated session forces a logout-equivalent state rather
/// than being served.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    session: Session,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let security = state.shared.config.read().await.security.clone();

    // Step 1: transport credential established by a prior login in this
    // browser session.
    match session.get::<SessionId>(SESSION_ID_KEY).await {
        Ok(Some(session_id)) => {
            if let Some(resolved) = state
                .shared
                .auth_service
                .resolve_session(session_id.value())
                .await?
            {
                let actor = CurrentActor::from(resolved);
                record_actor_span(&actor);
                request.extensions_mut().insert(actor);
                return Ok(next.run(request).await);
            }

            // The credential points at a session that is gone or terminated
            // elsewhere; never keep serving it.
            let _ = session.flush().await;
        }
        Ok(None) => {}
        Err(e) => return Err(ApiError::internal(format!("Session store error: {e}"))),
    }

    // Step 2: remember cookie.
    if let Some(raw) = cookie_value(request.headers(), &security.remember_cookie_name) {
        let token = crypto::verify_cookie_value(&raw, &security.secret_key);

        let resolved = match token {
            Some(token) => state.shared.auth_service.resolve_remember_token(token).await?,
            None => {
                tracing::debug!("Remember cookie failed signature verification");
                None
            }
        };

        match resolved {
            Some((resolved, rotated_token)) => {
                // Same side effects as a fresh login: credential store gets
                // the session id, context gets the actor.
                session
                    .insert(SESSION_ID_KEY, SessionId::new(resolved.session.id))
                    .await
                    .map_err(|e| ApiError::internal(format!("Session store error: {e}")))?;

                let actor = CurrentActor::from(resolved);
                record_actor_span(&actor);
                request.extensions_mut().insert(actor);

                let mut response = next.run(request).await;
                set_remember_cookie(
                    &mut response,
                    &security.remember_cookie_name,
                    &crypto::sign_cookie_value(&rotated_token, &security.secret_key),
                    state.shared.config.read().await.server.secure_cookies,
                );
                return Ok(response);
            }
            None => {
                // Present but unusable: silent cleanup plus forced logout,
                // never a quiet ignore.
                let _ = session.flush().await;
                let mut response =
                    (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
                clear_remember_cookie(
                    &mut response,
                    &security.remember_cookie_name,
                    state.shared.config.read().await.server.secure_cookies,
                );
                return Ok(response);
            }
        }
    }

    // Step 3: unauthenticated.
    Ok((StatusCode::UNAUTHORIZED, "Unauthorized").into_response())
}

fn record_actor_span(actor: &CurrentActor) {
    if let Some(user) = actor.user() {
        tracing::Span::current().record("user_id", user.id);
    }
}

// ============================================================================
// Cookie plumbing
// ============================================================================

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;

    raw.split(';').map(str::trim).find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

fn append_set_cookie(response: &mut Response, cookie: &str) {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
}

fn set_remember_cookie(response: &mut Response, name: &str, value: &str, secure: bool) {
    let secure_flag = if secure { "; Secure" } else { "" };
    append_set_cookie(
        response,
        &format!(
            "{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={REMEMBER_COOKIE_MAX_AGE_SECONDS}{secure_flag}"
        ),
    );
}

fn clear_remember_cookie(response: &mut Response, name: &str, secure: bool) {
    let secure_flag = if secure { "; Secure" } else { "" };
    append_set_cookie(
        response,
        &format!("{name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0{secure_flag}"),
    );
}

/// Transport facts for the session row. Behind a proxy the client address
/// arrives in X-Forwarded-For; there is no direct-socket fallback worth
/// trusting more.
fn client_info(headers: &HeaderMap) -> ClientInfo {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map_or_else(|| "unknown".to_string(), |v| v.trim().to_string());

    ClientInfo {
        user_agent,
        ip_address,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    session: Session,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    if payload.email.is_empty() {
        return Err(ApiError::validation("Email is required"));
    }
    if payload.password.is_empty() {
        return Err(ApiError::validation("Password is required"));
    }

    let client = client_info(&headers);

    let outcome = state
        .shared
        .auth_service
        .login(&payload.email, &payload.password, payload.remember, &client)
        .await?;

    session
        .insert(SESSION_ID_KEY, SessionId::new(outcome.session.id))
        .await
        .map_err(|e| ApiError::internal(format!("Failed to establish session: {e}")))?;

    let security = state.shared.config.read().await.security.clone();
    let secure_cookies = state.shared.config.read().await.server.secure_cookies;

    let body = ApiResponse::success(LoginResponse {
        user: UserDto::from_user(
            &outcome.user,
            outcome.roles,
            i64::from(security.lockout_minutes),
        ),
        session_id: outcome.session.id,
        password_expired: outcome.password_expired,
    });

    let mut response = Json(body).into_response();

    if let Some(token) = outcome.remember_token {
        set_remember_cookie(
            &mut response,
            &security.remember_cookie_name,
            &crypto::sign_cookie_value(&token, &security.secret_key),
            secure_cookies,
        );
    }

    Ok(response)
}

/// POST /auth/logout
///
/// Terminates the persisted session, drops the transport credential and
/// clears the remember cookie. Safe to call repeatedly.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Response, ApiError> {
    if let Ok(Some(session_id)) = session.get::<SessionId>(SESSION_ID_KEY).await {
        state.shared.auth_service.logout(session_id.value()).await?;
    }

    let _ = session.flush().await;

    let security = state.shared.config.read().await.security.clone();
    let secure_cookies = state.shared.config.read().await.server.secure_cookies;

    let mut response = (StatusCode::OK, "Logged out").into_response();
    clear_remember_cookie(&mut response, &security.remember_cookie_name, secure_cookies);

    Ok(response)
}

/// POST /auth/register
///
/// Open exactly while the system has no users (bootstrap); afterwards user
/// creation is an admin capability on the /users surface.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RegisteredUser>>), ApiError> {
    let has_users = state.shared.store.user_count().await? > 0;
    let actor = PolicyActor::anonymous(has_users);

    state.authorize(&actor, &Resource::User(None), Action::Create)?;

    let registered = state
        .shared
        .auth_service
        .register(&payload.email, &payload.password, &payload.display_name)
        .await?;

    // First account bootstraps the admin role.
    if !has_users {
        state
            .shared
            .store
            .assign_role(registered.user_id, crate::authz::ADMIN_ROLE)
            .await?;
    }

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(registered)),
    ))
}

/// POST /auth/confirm
///
/// Redeems a confirmation token and establishes a session, the same way a
/// login would.
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    session: Session,
    headers: HeaderMap,
    Json(payload): Json<ConfirmRequest>,
) -> Result<Json<ApiResponse<LoginResponse>>, ApiError> {
    let client = client_info(&headers);

    let outcome = state
        .shared
        .auth_service
        .confirm(&payload.token, &client)
        .await?;

    session
        .insert(SESSION_ID_KEY, SessionId::new(outcome.session.id))
        .await
        .map_err(|e| ApiError::internal(format!("Failed to establish session: {e}")))?;

    let lockout_minutes =
        i64::from(state.shared.config.read().await.security.lockout_minutes);

    Ok(Json(ApiResponse::success(LoginResponse {
        user: UserDto::from_user(&outcome.user, outcome.roles, lockout_minutes),
        session_id: outcome.session.id,
        password_expired: outcome.password_expired,
    })))
}

/// GET /auth/me
pub async fn get_current_user(
    State(state): State<Arc<AppState>>,
    actor: CurrentActor,
) -> Result<Json<ApiResponse<UserDto>>, ApiError> {
    let user = actor
        .user()
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".to_string()))?;

    let lockout_minutes =
        i64::from(state.shared.config.read().await.security.lockout_minutes);

    Ok(Json(ApiResponse::success(UserDto::from_user(
        user,
        actor.roles().to_vec(),
        lockout_minutes,
    ))))
}

/// PUT /auth/password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    actor: CurrentActor,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let user = actor
        .user()
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".to_string()))?;

    state
        .shared
        .auth_service
        .change_password(user.id, &payload.current_password, &payload.new_password)
        .await?;

    tracing::info!(user_id = user.id, "Password changed");

    Ok(Json(ApiResponse::success(MessageResponse {
        message: "Password updated successfully".to_string(),
    })))
}
